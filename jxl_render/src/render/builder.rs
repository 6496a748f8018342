// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use crate::{
    error::{Error, Result},
    frame_dimensions::FrameDimensions,
    options::RenderPipelineOptions,
    util::tracing_wrappers::*,
};

use super::{
    RenderPipeline, RenderPipelineChannelMode, RenderPipelineStage,
    internal::{RenderPipelineShared, RenderPipelineStrategy},
    low_memory_pipeline::LowMemoryRenderPipeline,
    simple_pipeline::SimpleRenderPipeline,
};

pub(crate) const MAX_BORDER: u8 = 8;
pub(crate) const MAX_SHIFT: u8 = 3;

pub struct RenderPipelineBuilder {
    num_channels: usize,
    frame_dimensions: FrameDimensions,
    stages: Vec<Box<dyn RenderPipelineStage>>,
    options: RenderPipelineOptions,
}

impl RenderPipelineBuilder {
    #[instrument(level = "debug")]
    pub fn new(num_channels: usize, frame_dimensions: FrameDimensions) -> Self {
        info!("creating render pipeline");
        RenderPipelineBuilder {
            num_channels,
            frame_dimensions,
            stages: vec![],
            options: RenderPipelineOptions::default(),
        }
    }

    pub fn use_simple_implementation(mut self, simple: bool) -> Self {
        self.options.use_simple_implementation = simple;
        self
    }

    pub fn with_options(mut self, options: &RenderPipelineOptions) -> Self {
        self.options = options.clone();
        self
    }

    #[instrument(skip_all, err)]
    pub fn add_stage<S: RenderPipelineStage + 'static>(self, stage: S) -> Result<Self> {
        self.add_boxed_stage(Box::new(stage))
    }

    pub fn add_boxed_stage(mut self, stage: Box<dyn RenderPipelineStage>) -> Result<Self> {
        let settings = stage.settings();
        debug!(?settings, "adding stage '{stage}'");
        if settings.border_x > MAX_BORDER || settings.border_y > MAX_BORDER {
            return Err(Error::StageBorderTooLarge(
                stage.to_string(),
                settings.border_x,
                settings.border_y,
                MAX_BORDER,
            ));
        }
        if settings.shift_x > MAX_SHIFT || settings.shift_y > MAX_SHIFT {
            return Err(Error::StageShiftTooLarge(
                stage.to_string(),
                settings.shift_x,
                settings.shift_y,
                MAX_SHIFT,
            ));
        }
        let modes: Vec<_> = (0..self.num_channels)
            .map(|c| stage.channel_mode(c))
            .collect();
        if modes.iter().all(|m| *m == RenderPipelineChannelMode::Ignored) {
            return Err(Error::StageUsesNoChannels(stage.to_string()));
        }
        let has_border_or_shift = settings != super::StageSettings::none();
        if has_border_or_shift {
            for (c, mode) in modes.iter().enumerate() {
                if matches!(
                    mode,
                    RenderPipelineChannelMode::InPlace | RenderPipelineChannelMode::Input
                ) {
                    return Err(Error::InPlaceStageWithBorderOrShift(stage.to_string(), c));
                }
            }
            if !modes.contains(&RenderPipelineChannelMode::InOut) {
                return Err(Error::BorderWithoutInOutChannel(stage.to_string()));
            }
        }
        self.stages.push(stage);
        Ok(self)
    }

    /// Validates the stage list, computes the shift and padding tables and creates the
    /// execution strategy.
    #[instrument(skip_all, err)]
    pub fn build(self) -> Result<RenderPipeline> {
        debug!(
            num_stages = self.stages.len(),
            options = ?self.options,
            "building render pipeline"
        );
        let shared =
            RenderPipelineShared::new(self.num_channels, self.frame_dimensions, self.stages)?;
        let strategy: Box<dyn RenderPipelineStrategy> = if self.options.use_simple_implementation
        {
            Box::new(SimpleRenderPipeline::new(&shared)?)
        } else {
            Box::new(LowMemoryRenderPipeline::new(&shared)?)
        };
        let mut pipeline = RenderPipeline::new(shared, strategy);
        if let Some(num_threads) = self.options.num_threads {
            pipeline.prepare_for_threads(num_threads, self.options.use_group_ids)?;
        }
        Ok(pipeline)
    }
}
