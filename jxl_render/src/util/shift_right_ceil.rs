// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

pub trait ShiftRightCeil: Copy {
    /// Divides by `1 << shift`, rounding up.
    fn shrc<T: Into<usize>>(self, shift: T) -> Self;
}

impl ShiftRightCeil for usize {
    fn shrc<T: Into<usize>>(self, shift: T) -> usize {
        let shift = shift.into();
        self.div_ceil(1 << shift)
    }
}
