// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use crate::render::{
    InputRows, OutputRows, RenderPipelineChannelMode, RenderPipelineStage, StageSettings,
};

fn interpolate(prev: f32, cur: f32, next: f32) -> (f32, f32) {
    let scaled_cur = cur * 0.75;
    (prev.mul_add(0.25, scaled_cur), next.mul_add(0.25, scaled_cur))
}

pub struct HorizontalChromaUpsample {
    channel: usize,
}

impl HorizontalChromaUpsample {
    pub fn new(channel: usize) -> HorizontalChromaUpsample {
        HorizontalChromaUpsample { channel }
    }
}

impl std::fmt::Display for HorizontalChromaUpsample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chroma upsample of channel {}, horizontally",
            self.channel
        )
    }
}

impl RenderPipelineStage for HorizontalChromaUpsample {
    fn settings(&self) -> StageSettings {
        StageSettings::horizontal(1, 1)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c == self.channel {
            RenderPipelineChannelMode::InOut
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let input = input_rows[self.channel][0];
        let output = &mut output_rows[self.channel][0];
        for (x, window) in input.windows(3).take(xsize + 2 * xextra).enumerate() {
            let (left, right) = interpolate(window[0], window[1], window[2]);
            output[2 * x] = left;
            output[2 * x + 1] = right;
        }
    }
}

pub struct VerticalChromaUpsample {
    channel: usize,
}

impl VerticalChromaUpsample {
    pub fn new(channel: usize) -> VerticalChromaUpsample {
        VerticalChromaUpsample { channel }
    }
}

impl std::fmt::Display for VerticalChromaUpsample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chroma upsample of channel {}, vertically", self.channel)
    }
}

impl RenderPipelineStage for VerticalChromaUpsample {
    fn settings(&self) -> StageSettings {
        StageSettings::vertical(1, 1)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        if c == self.channel {
            RenderPipelineChannelMode::InOut
        } else {
            RenderPipelineChannelMode::Ignored
        }
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let [prev, cur, next] = input_rows[self.channel][..] else {
            panic!(
                "incorrect number of input rows; expected 3, found {}",
                input_rows[self.channel].len()
            );
        };
        let [up, down] = &mut output_rows[self.channel][..] else {
            panic!("incorrect number of output rows");
        };
        for x in 0..xsize + 2 * xextra {
            let (u, d) = interpolate(prev[x], cur[x], next[x]);
            up[x] = u;
            down[x] = d;
        }
    }
}
