// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{error::Result, image::Image, util::mirror};

/// Ring of rows produced by one stage for one channel. Rows are addressed by their
/// (possibly negative) index relative to the rect being rendered; only the last
/// `num_rows` rows are kept.
pub struct RowBuffer {
    data: Vec<f32>,
    row_len: usize,
    mask: usize,
    /// Position in each row of pixel 0 of the rect.
    x_offset: usize,
}

impl RowBuffer {
    pub fn new(num_rows: usize, row_len: usize, x_offset: usize) -> Result<RowBuffer> {
        debug_assert!(num_rows.is_power_of_two());
        let mut data = vec![];
        data.try_reserve_exact(num_rows * row_len)?;
        data.resize(num_rows * row_len, 0.0);
        Ok(RowBuffer {
            data,
            row_len,
            mask: num_rows - 1,
            x_offset,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.mask + 1
    }

    fn slot(&self, y: isize) -> usize {
        (y as usize) & self.mask
    }

    pub fn row(&self, y: isize) -> &[f32] {
        let start = self.slot(y) * self.row_len;
        &self.data[start..start + self.row_len]
    }

    pub fn row_mut(&mut self, y: isize) -> &mut [f32] {
        let start = self.slot(y) * self.row_len;
        &mut self.data[start..start + self.row_len]
    }

    /// Returns pixels `[start, start + len)` of row `y`.
    pub fn window_mut(&mut self, y: isize, start: isize, len: usize) -> &mut [f32] {
        let start = window_start(self.x_offset, start);
        &mut self.row_mut(y)[start..start + len]
    }

    /// Returns pixels `[start, start + len)` of `count` consecutive rows starting from `y`.
    pub fn windows_mut(
        &mut self,
        y: isize,
        count: usize,
        start: isize,
        len: usize,
    ) -> impl Iterator<Item = &mut [f32]> {
        let start = window_start(self.x_offset, start);
        self.rows_mut(y, count)
            .map(move |row| &mut row[start..start + len])
    }

    /// Returns `count` consecutive rows starting from row `y`.
    pub fn rows_mut(&mut self, y: isize, count: usize) -> impl Iterator<Item = &mut [f32]> {
        debug_assert!(count <= self.num_rows());
        let row_len = self.row_len;
        let at = self.slot(y) * row_len;
        let (head, tail) = self.data.split_at_mut(at);
        tail.chunks_exact_mut(row_len)
            .chain(head.chunks_exact_mut(row_len))
            .take(count)
    }
}

/// Where a stage reads a channel from: either the group input buffer, or the ring buffer
/// of an earlier stage.
pub enum RowSource<'a> {
    Group {
        image: &'a mut Image<f32>,
        /// Position in `image` of pixel (0, 0) of the rect.
        origin: (usize, usize),
    },
    Ring(&'a mut RowBuffer),
}

fn window_start(x0: usize, start: isize) -> usize {
    (x0 as isize + start) as usize
}

impl<'a> RowSource<'a> {
    fn row_mut(&mut self, y: isize) -> (&mut [f32], usize) {
        match self {
            RowSource::Group { image, origin } => (
                image.row_mut((origin.1 as isize + y) as usize),
                origin.0,
            ),
            RowSource::Ring(buffer) => {
                let x0 = buffer.x_offset;
                (buffer.row_mut(y), x0)
            }
        }
    }

    /// Returns pixels `[start, start + len)` of row `y`.
    pub fn window(&mut self, y: isize, start: isize, len: usize) -> &[f32] {
        let (row, x0) = self.row_mut(y);
        let start = window_start(x0, start);
        &row[start..start + len]
    }

    pub fn into_window_mut(self, y: isize, start: isize, len: usize) -> &'a mut [f32] {
        let (row, x0) = match self {
            RowSource::Group { image, origin } => (
                image.row_mut((origin.1 as isize + y) as usize),
                origin.0,
            ),
            RowSource::Ring(buffer) => {
                let x0 = buffer.x_offset;
                (buffer.row_mut(y), x0)
            }
        };
        let start = window_start(x0, start);
        &mut row[start..start + len]
    }

    /// Overwrites the pixels of `[start, start + len)` that fall outside `[0, xsize)` of the
    /// full image with their mirror image; `rect_x0` is the position of pixel 0 in the full
    /// image.
    pub fn mirror_x(&mut self, y: isize, start: isize, len: usize, rect_x0: usize, xsize: usize) {
        let (row, x0) = self.row_mut(y);
        let first = -(rect_x0 as isize);
        let past_end = xsize as isize - rect_x0 as isize;
        let end = start + len as isize;
        for x in (start..first.min(end)).chain(past_end.max(start)..end) {
            let src = mirror(x + rect_x0 as isize, xsize) as isize - rect_x0 as isize;
            row[window_start(x0, x)] = row[window_start(x0, src)];
        }
    }

    pub fn into_shared(self) -> SharedRowSource<'a> {
        match self {
            RowSource::Group { image, origin } => SharedRowSource::Group { image, origin },
            RowSource::Ring(buffer) => SharedRowSource::Ring(buffer),
        }
    }
}

pub enum SharedRowSource<'a> {
    Group {
        image: &'a Image<f32>,
        origin: (usize, usize),
    },
    Ring(&'a RowBuffer),
}

impl<'a> SharedRowSource<'a> {
    pub fn window(&self, y: isize, start: isize, len: usize) -> &'a [f32] {
        let (row, x0) = match *self {
            SharedRowSource::Group { image, origin } => {
                (image.row((origin.1 as isize + y) as usize), origin.0)
            }
            SharedRowSource::Ring(buffer) => (buffer.row(y), buffer.x_offset),
        };
        let start = window_start(x0, start);
        &row[start..start + len]
    }
}
