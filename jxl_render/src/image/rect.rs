// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::error::{Error, Result};
use crate::util::ShiftRightCeil;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Rect {
    pub origin: (usize, usize),
    // width, height
    pub size: (usize, usize),
}

impl Rect {
    pub const fn new(origin: (usize, usize), size: (usize, usize)) -> Rect {
        Rect { origin, size }
    }

    pub fn is_within(&self, size: (usize, usize)) -> Result<()> {
        if self
            .origin
            .0
            .checked_add(self.size.0)
            .ok_or(Error::ArithmeticOverflow)?
            > size.0
            || self
                .origin
                .1
                .checked_add(self.size.1)
                .ok_or(Error::ArithmeticOverflow)?
                > size.1
        {
            Err(Error::RectOutOfBounds(
                self.size.0,
                self.size.1,
                self.origin.0,
                self.origin.1,
                size.0,
                size.1,
            ))
        } else {
            Ok(())
        }
    }

    pub const fn end(&self) -> (usize, usize) {
        (self.origin.0 + self.size.0, self.origin.1 + self.size.1)
    }

    pub const fn is_empty(&self) -> bool {
        self.size.0 == 0 || self.size.1 == 0
    }

    pub const fn translate(&self, offset: (usize, usize)) -> Rect {
        Rect {
            origin: (self.origin.0 + offset.0, self.origin.1 + offset.1),
            size: self.size,
        }
    }

    /// Shrinks the rect so that it lies within an image of the given size.
    pub fn clip(&self, size: (usize, usize)) -> Rect {
        let origin = (self.origin.0.min(size.0), self.origin.1.min(size.1));
        let end = (self.end().0.min(size.0), self.end().1.min(size.1));
        Rect {
            origin,
            size: (end.0 - origin.0, end.1 - origin.1),
        }
    }

    /// Returns the common area of the two rects; empty rects are normalized to a zero size.
    pub fn intersection(&self, other: &Rect) -> Rect {
        let origin = (
            self.origin.0.max(other.origin.0),
            self.origin.1.max(other.origin.1),
        );
        let end = (
            self.end().0.min(other.end().0),
            self.end().1.min(other.end().1),
        );
        Rect {
            origin,
            size: (end.0.saturating_sub(origin.0), end.1.saturating_sub(origin.1)),
        }
    }

    pub const fn shift_left(&self, shift: usize) -> Rect {
        Rect {
            origin: (self.origin.0 << shift, self.origin.1 << shift),
            size: (self.size.0 << shift, self.size.1 << shift),
        }
    }

    /// Converts the rect to a resolution downsampled by `shift`. The origin is
    /// rounded down and the size rounded up.
    pub fn ceil_shift_right(&self, shift: (usize, usize)) -> Rect {
        Rect {
            origin: (self.origin.0 >> shift.0, self.origin.1 >> shift.1),
            size: (self.size.0.shrc(shift.0), self.size.1.shrc(shift.1)),
        }
    }
}
