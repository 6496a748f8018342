// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#![deny(unsafe_code)]
pub mod error;
pub mod frame_dimensions;
pub mod image;
pub mod options;
pub mod render;
pub mod util;
