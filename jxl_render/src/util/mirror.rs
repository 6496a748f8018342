// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// Mirror-reflects a value v to fit in a [0; s) range.
pub fn mirror(mut v: isize, s: usize) -> usize {
    debug_assert!(s > 0);
    loop {
        if v < 0 {
            v = -v - 1;
        } else if v >= s as isize {
            v = s as isize * 2 - v - 1;
        } else {
            return v as usize;
        }
    }
}

/// Maps row `y` (relative to a rect starting at `rect_y0`) to the row that holds its value,
/// reflecting at the top and bottom edges of an image of height `image_ysize`.
pub fn mirrored_row(y: isize, rect_y0: usize, image_ysize: usize) -> isize {
    let image_y = y + rect_y0 as isize;
    if image_y < 0 || image_y >= image_ysize as isize {
        mirror(image_y, image_ysize) as isize - rect_y0 as isize
    } else {
        y
    }
}

#[cfg(test)]
mod test {
    use super::{mirror, mirrored_row};

    #[test]
    fn reflect() {
        assert_eq!(mirror(-1, 10), 0);
        assert_eq!(mirror(-2, 10), 1);
        assert_eq!(mirror(10, 10), 9);
        assert_eq!(mirror(11, 10), 8);
        assert_eq!(mirror(5, 10), 5);
        // Multiple reflections for tiny sizes.
        assert_eq!(mirror(-3, 2), 1);
        assert_eq!(mirror(4, 2), 0);
        assert_eq!(mirror(7, 1), 0);
    }

    #[test]
    fn rows_near_edges() {
        assert_eq!(mirrored_row(-1, 0, 100), 0);
        assert_eq!(mirrored_row(-2, 0, 100), 1);
        assert_eq!(mirrored_row(-2, 64, 100), -2);
        assert_eq!(mirrored_row(36, 64, 100), 35);
        assert_eq!(mirrored_row(37, 64, 100), 34);
        assert_eq!(mirrored_row(3, 64, 100), 3);
    }
}
