// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    error::{Error, Result},
    image::Rect,
    util::ShiftRightCeil,
};

const MIN_LOG_GROUP_DIM: usize = 3;
const MAX_LOG_GROUP_DIM: usize = 10;
const MAX_UPSAMPLING_SHIFT: usize = 3;
const MAX_IMAGE_DIM: usize = 1 << 30;

/// Geometry of a frame: its size before and after upsampling, and the group grid laid
/// over the non-upsampled ("base") resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameDimensions {
    /// Size of the frame after upsampling; this is the resolution stages produce.
    pub xsize_upsampled: usize,
    pub ysize_upsampled: usize,
    /// Size of the base grid.
    pub xsize: usize,
    pub ysize: usize,
    pub upsampling_shift: usize,
    pub log_group_dim: usize,
    pub group_dim: usize,
    pub xsize_groups: usize,
    pub ysize_groups: usize,
    pub num_groups: usize,
}

impl FrameDimensions {
    pub fn new(
        size_upsampled: (usize, usize),
        log_group_dim: usize,
        upsampling_shift: usize,
    ) -> Result<FrameDimensions> {
        let (xsize_upsampled, ysize_upsampled) = size_upsampled;
        if xsize_upsampled == 0 || ysize_upsampled == 0 {
            return Err(Error::InvalidImageSize(xsize_upsampled, ysize_upsampled));
        }
        if xsize_upsampled > MAX_IMAGE_DIM || ysize_upsampled > MAX_IMAGE_DIM {
            return Err(Error::ImageSizeTooLarge(xsize_upsampled, ysize_upsampled));
        }
        if !(MIN_LOG_GROUP_DIM..=MAX_LOG_GROUP_DIM).contains(&log_group_dim) {
            return Err(Error::InvalidGroupSizeShift(log_group_dim));
        }
        if upsampling_shift > MAX_UPSAMPLING_SHIFT {
            return Err(Error::InvalidUpsamplingShift(upsampling_shift));
        }
        let xsize = xsize_upsampled.shrc(upsampling_shift);
        let ysize = ysize_upsampled.shrc(upsampling_shift);
        let xsize_groups = xsize.shrc(log_group_dim);
        let ysize_groups = ysize.shrc(log_group_dim);
        Ok(FrameDimensions {
            xsize_upsampled,
            ysize_upsampled,
            xsize,
            ysize,
            upsampling_shift,
            log_group_dim,
            group_dim: 1 << log_group_dim,
            xsize_groups,
            ysize_groups,
            num_groups: xsize_groups * ysize_groups,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.xsize, self.ysize)
    }

    pub fn size_upsampled(&self) -> (usize, usize) {
        (self.xsize_upsampled, self.ysize_upsampled)
    }

    pub fn group_position(&self, group_id: usize) -> (usize, usize) {
        (group_id % self.xsize_groups, group_id / self.xsize_groups)
    }

    /// Area covered by the group, in base-grid coordinates.
    pub fn group_rect(&self, group_id: usize) -> Rect {
        let (gx, gy) = self.group_position(group_id);
        let origin = (gx * self.group_dim, gy * self.group_dim);
        Rect::new(origin, (self.group_dim, self.group_dim)).clip(self.size())
    }
}
