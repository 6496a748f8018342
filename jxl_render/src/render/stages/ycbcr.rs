// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::render::{InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage};

// Full-range BT.601, as in JFIF (ITU-T T.871).
const Y_OFFSET: f32 = 128.0 / 255.0;
const CR_TO_R: f32 = 1.402;
const CB_TO_G: f32 = -0.114 * 1.772 / 0.587;
const CR_TO_G: f32 = -0.299 * 1.402 / 0.587;
const CB_TO_B: f32 = 1.772;

/// Converts three channels holding Cb, Y and Cr (Y centered on 0) to R, G and B in place.
pub struct YcbcrToRgbStage {
    first_channel: usize,
}

impl YcbcrToRgbStage {
    pub fn new(first_channel: usize) -> Self {
        Self { first_channel }
    }
}

impl std::fmt::Display for YcbcrToRgbStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channel = self.first_channel;
        write!(
            f,
            "YCbCr to RGB for channel [{},{},{}]",
            channel,
            channel + 1,
            channel + 2
        )
    }
}

impl RenderPipelineStage for YcbcrToRgbStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if (self.first_channel..self.first_channel + 3).contains(&c) {
            RenderPipelineChannelMode::InPlace
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn process_row(
        &self,
        _input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        // Channels are in Cb, Y, Cr order; the output is R, G, B.
        let [cb, y, cr] = &mut output_rows[self.first_channel..self.first_channel + 3] else {
            unreachable!();
        };
        let len = xsize + 2 * xextra;
        let pixels = cb[0][..len]
            .iter_mut()
            .zip(y[0][..len].iter_mut())
            .zip(cr[0][..len].iter_mut());
        for ((cb, y), cr) in pixels {
            let luma = *y + Y_OFFSET;
            let (vb, vr) = (*cb, *cr);
            *cb = vr.mul_add(CR_TO_R, luma);
            *y = vr.mul_add(CR_TO_G, vb.mul_add(CB_TO_G, luma));
            *cr = vb.mul_add(CB_TO_B, luma);
        }
    }
}
