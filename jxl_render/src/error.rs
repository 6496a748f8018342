// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::collections::TryReserveError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Out of memory: {0}")]
    OutOfMemory(#[from] TryReserveError),
    #[error("Image size too large: {0}x{1}")]
    ImageSizeTooLarge(usize, usize),
    #[error("Invalid image size: {0}x{1}")]
    InvalidImageSize(usize, usize),
    #[error("Rect out of bounds: {0}x{1}+{2}+{3} rect in {4}x{5} view")]
    RectOutOfBounds(usize, usize, usize, usize, usize, usize),
    #[error("Trying to copy rects of different size, src: {0}x{1} dst {2}x{3}")]
    CopyOfDifferentSize(usize, usize, usize, usize),
    // Generic arithmetic overflow. Prefer using other errors if possible.
    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
    #[error("Invalid group size shift: {0}")]
    InvalidGroupSizeShift(usize),
    #[error("Invalid upsampling shift: {0}")]
    InvalidUpsamplingShift(usize),
    #[error("Render pipeline has no stages")]
    EmptyPipeline,
    #[error("Render pipeline needs at least one channel")]
    NoChannels,
    #[error("Last stage of the render pipeline ({0}) has an InOut channel {1}")]
    PipelineEndsWithInOut(String, usize),
    #[error("Stage {0} is not initialized")]
    StageNotInitialized(String),
    #[error("Stage {0} has a border of {1}x{2}, but at most {3} is supported")]
    StageBorderTooLarge(String, u8, u8, u8),
    #[error("Stage {0} has a shift of {1}x{2}, but at most {3} is supported")]
    StageShiftTooLarge(String, u8, u8, u8),
    #[error("Stage {0} does not use any channel")]
    StageUsesNoChannels(String),
    #[error("Stage {0} uses channel {1} in place or as input, but has a border or a shift")]
    InPlaceStageWithBorderOrShift(String, usize),
    #[error("Stage {0} has a border or a shift but no InOut channel")]
    BorderWithoutInOutChannel(String),
    #[error("Stage {0} sees channels with different shifts: {1:?} and {2:?}")]
    MismatchedChannelShifts(String, (usize, usize), (usize, usize)),
    #[error("Stage {0} switches to image dimensions, but stage {1} already did")]
    MultipleImageDimensionSwitches(String, String),
    #[error("Stage {0} has an InOut channel after the switch to image dimensions")]
    InOutAfterImageDimensionSwitch(String),
    #[error("Group of {0}x{1} pixels is too small for a border of {2}x{3} pixels")]
    GroupTooSmallForBorder(usize, usize, usize, usize),
    #[error("Channel {0} is downsampled more than the frame allows: shift {1:?}")]
    ChannelShiftTooLarge(usize, (usize, usize)),
    #[error("Render pipeline was not prepared for threads")]
    ThreadsNotPrepared,
    #[error("Invalid thread id {0}, pipeline was prepared for {1} threads")]
    InvalidThreadId(usize, usize),
    #[error("Invalid group id {0}, frame has {1} groups")]
    InvalidGroupId(usize, usize),
    #[error("Invalid channel {0}, pipeline has {1} channels")]
    InvalidChannel(usize, usize),
    #[error("Expected {0} channels, found {1}")]
    ChannelCountMismatch(usize, usize),
    #[error("Background image is {0}x{1}, but the canvas is {2}x{3}")]
    BackgroundSizeMismatch(usize, usize, usize, usize),
    #[error("Sigma image has {0}x{1} blocks, but the filtered channels need {2}x{3}")]
    SigmaImageTooSmall(usize, usize, usize, usize),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
