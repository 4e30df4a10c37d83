use crate::error::{FrameError, Result};
use crate::format::{PixelFormat, MAX_PLANES};

/// One plane of a native frame: a mutable borrow of caller-owned bytes and
/// the row stride used to address them.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u8],
    stride: usize,
}

impl<'a> PlaneMut<'a> {
    pub fn new(data: &'a mut [u8], stride: usize) -> Self {
        Self { data, stride }
    }

    pub fn data(&self) -> &[u8] {
        &*self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }

    /// Byte distance between the starts of consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total bytes the caller handed over for this plane.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An exclusively-borrowed view over a captured video frame.
///
/// The view never reallocates the planes it borrows; consumers may only
/// overwrite bytes inside each plane's existing bounds. `format` is public
/// because processing may retag the frame (e.g. BGRX becoming BGRA once the
/// fourth byte carries alpha).
#[derive(Debug)]
pub struct NativeFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    planes: [Option<PlaneMut<'a>>; MAX_PLANES],
}

impl<'a> NativeFrame<'a> {
    /// Create a view with no planes attached.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            planes: std::array::from_fn(|_| None),
        }
    }

    /// Attach the next plane. Planes beyond [`MAX_PLANES`] are ignored.
    pub fn with_plane(mut self, data: &'a mut [u8], stride: usize) -> Self {
        if let Some(slot) = self.planes.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(PlaneMut::new(data, stride));
        }
        self
    }

    /// Build a view from raw pointer/stride pairs handed over by a C caller.
    ///
    /// Only the planes `format` needs are read. Each plane's bound is derived
    /// as `stride * rows` for that plane, so later copies can be checked
    /// against it.
    ///
    /// # Safety
    ///
    /// Every pointer for a plane the format uses must be valid for reads and
    /// writes of `stride * rows` bytes for the lifetime `'a`, and no two
    /// planes may overlap or be aliased elsewhere while the view is alive.
    pub unsafe fn from_raw_parts(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: &[*mut u8],
        strides: &[u32],
    ) -> Result<Self> {
        let needed = format.plane_count();
        let got = data.len().min(strides.len());
        if got < needed {
            return Err(FrameError::MissingPlanes {
                format: format.to_string(),
                needed,
                got,
            });
        }

        let mut frame = Self::new(width, height, format);
        for index in 0..needed {
            let ptr = data[index];
            if ptr.is_null() {
                return Err(FrameError::NullPlane(index));
            }
            let stride = strides[index] as usize;
            let rows = format.plane_rows(index, height);
            let len = stride
                .checked_mul(rows)
                .ok_or(FrameError::PlaneOverflow {
                    index,
                    stride,
                    rows,
                })?;
            let plane = std::slice::from_raw_parts_mut(ptr, len);
            frame = frame.with_plane(plane, stride);
        }
        Ok(frame)
    }

    pub fn plane(&self, index: usize) -> Option<&PlaneMut<'a>> {
        self.planes.get(index).and_then(Option::as_ref)
    }

    pub fn plane_mut(&mut self, index: usize) -> Option<&mut PlaneMut<'a>> {
        self.planes.get_mut(index).and_then(Option::as_mut)
    }

    /// Number of leading planes that are attached.
    pub fn plane_count(&self) -> usize {
        self.planes.iter().take_while(|p| p.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_attach_in_order() {
        let mut y = vec![1u8; 16];
        let mut uv = vec![2u8; 8];
        let frame = NativeFrame::new(4, 4, PixelFormat::Nv12)
            .with_plane(&mut y, 4)
            .with_plane(&mut uv, 4);

        assert_eq!(frame.plane_count(), 2);
        assert_eq!(frame.plane(0).unwrap().data()[0], 1);
        assert_eq!(frame.plane(1).unwrap().stride(), 4);
        assert!(frame.plane(2).is_none());
    }

    #[test]
    fn writes_through_the_view_land_in_caller_buffer() {
        let mut y = vec![0u8; 4];
        {
            let mut frame = NativeFrame::new(2, 2, PixelFormat::Y800).with_plane(&mut y, 2);
            frame.plane_mut(0).unwrap().data_mut()[3] = 9;
        }
        assert_eq!(y, vec![0, 0, 0, 9]);
    }

    #[test]
    fn extra_planes_beyond_capacity_are_ignored() {
        let mut buffers: Vec<Vec<u8>> = (0..MAX_PLANES + 1).map(|_| vec![0u8; 1]).collect();
        let mut frame = NativeFrame::new(1, 1, PixelFormat::Y800);
        for buf in buffers.iter_mut() {
            frame = frame.with_plane(buf, 1);
        }
        assert_eq!(frame.plane_count(), MAX_PLANES);
    }

    #[test]
    fn from_raw_parts_bounds_each_plane_by_stride_and_rows() {
        let mut y = vec![0u8; 8 * 4];
        let mut u = vec![0u8; 4 * 2];
        let mut v = vec![0u8; 4 * 2];
        let ptrs = [y.as_mut_ptr(), u.as_mut_ptr(), v.as_mut_ptr()];
        let strides = [8, 4, 4];

        let frame =
            unsafe { NativeFrame::from_raw_parts(8, 4, PixelFormat::I420, &ptrs, &strides) }
                .unwrap();

        assert_eq!(frame.plane_count(), 3);
        assert_eq!(frame.plane(0).unwrap().len(), 32);
        assert_eq!(frame.plane(1).unwrap().len(), 8);
        assert_eq!(frame.plane(2).unwrap().len(), 8);
    }

    #[test]
    fn from_raw_parts_rejects_null_plane() {
        let mut y = vec![0u8; 16];
        let ptrs = [y.as_mut_ptr(), std::ptr::null_mut()];
        let strides = [4, 4];

        let err = unsafe { NativeFrame::from_raw_parts(4, 4, PixelFormat::Nv12, &ptrs, &strides) }
            .unwrap_err();
        assert_eq!(err, FrameError::NullPlane(1));
    }

    #[test]
    fn from_raw_parts_rejects_missing_planes() {
        let mut y = vec![0u8; 16];
        let ptrs = [y.as_mut_ptr()];
        let strides = [4];

        let err = unsafe { NativeFrame::from_raw_parts(4, 4, PixelFormat::I420, &ptrs, &strides) }
            .unwrap_err();
        assert!(matches!(
            err,
            FrameError::MissingPlanes {
                needed: 3,
                got: 1,
                ..
            }
        ));
    }

    #[test]
    fn from_raw_parts_with_unknown_format_attaches_nothing() {
        let frame =
            unsafe { NativeFrame::from_raw_parts(4, 4, PixelFormat::Unknown(99), &[], &[]) }
                .unwrap();
        assert_eq!(frame.plane_count(), 0);
    }
}
