// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

mod blending;
mod chroma_upsample;
mod epf;
mod gaborish;
mod nearest_neighbor;
mod noise;
mod save;
mod write;
mod ycbcr;

pub use blending::*;
pub use chroma_upsample::*;
pub use epf::*;
pub use gaborish::*;
pub use nearest_neighbor::*;
pub use noise::*;
pub use save::*;
pub use write::*;
pub use ycbcr::*;
