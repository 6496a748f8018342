// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

use std::any::Any;

use rand::{Rng, SeedableRng, seq::SliceRandom};
use rand_xorshift::XorShiftRng;

use crate::{
    error::{Error, Result},
    frame_dimensions::FrameDimensions,
    image::{Image, copy_image_rect_to},
    util::tracing_wrappers::*,
};

use super::{
    InputRows, OutputRows, RenderPipeline, RenderPipelineBuilder, RenderPipelineChannelMode,
    RenderPipelineStage, StageSettings, stages::SaveToImageStage,
};

fn single_channel_mode(
    channel: usize,
    c: usize,
    mode: RenderPipelineChannelMode,
) -> RenderPipelineChannelMode {
    if c == channel {
        mode
    } else {
        RenderPipelineChannelMode::Ignored
    }
}

/// Doubles the width of a channel; odd output pixels average their two neighbours.
pub(crate) struct UpsampleXSlowStage {
    channel: usize,
}

impl UpsampleXSlowStage {
    pub(crate) fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl std::fmt::Display for UpsampleXSlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slow x upsample of channel {}", self.channel)
    }
}

impl RenderPipelineStage for UpsampleXSlowStage {
    fn settings(&self) -> StageSettings {
        StageSettings::horizontal(1, 1)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InOut)
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
        for x in 0..xsize + 2 * xextra {
            output[2 * x] = input[x + 1];
            output[2 * x + 1] = (input[x + 1] + input[x + 2]) * 0.5;
        }
    }
}

/// Doubles the height of a channel; odd output rows average their two neighbours.
pub(crate) struct UpsampleYSlowStage {
    channel: usize,
}

impl UpsampleYSlowStage {
    pub(crate) fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl std::fmt::Display for UpsampleYSlowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slow y upsample of channel {}", self.channel)
    }
}

impl RenderPipelineStage for UpsampleYSlowStage {
    fn settings(&self) -> StageSettings {
        StageSettings::vertical(1, 1)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InOut)
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
        let input = &input_rows[self.channel];
        let output = &mut output_rows[self.channel];
        for x in 0..xsize + 2 * xextra {
            output[0][x] = input[1][x];
            output[1][x] = (input[1][x] + input[2][x]) * 0.5;
        }
    }
}

pub(crate) struct AddConstantStage {
    channel: usize,
    value: f32,
}

impl AddConstantStage {
    pub(crate) fn new(channel: usize, value: f32) -> Self {
        Self { channel, value }
    }
}

impl std::fmt::Display for AddConstantStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "add {} to channel {}", self.value, self.channel)
    }
}

impl RenderPipelineStage for AddConstantStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InPlace)
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
        for v in output_rows[self.channel][0][..xsize + 2 * xextra].iter_mut() {
            *v += self.value;
        }
    }
}

/// Adds a function of the pixel position, to check that both implementations agree on it.
pub(crate) struct AddPositionStage {
    channel: usize,
}

impl AddPositionStage {
    pub(crate) fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl std::fmt::Display for AddPositionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "add position to channel {}", self.channel)
    }
}

impl RenderPipelineStage for AddPositionStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InPlace)
    }

    fn process_row(
        &self,
        _input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let first_x = xpos as isize - xextra as isize;
        let row = &mut output_rows[self.channel][0][..xsize + 2 * xextra];
        for (x, v) in (first_x..).zip(row.iter_mut()) {
            *v += x as f32 * 0.001 + ypos as f32 * 0.01;
        }
    }
}

pub(crate) struct NoopStage {
    channel: usize,
}

impl NoopStage {
    pub(crate) fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl std::fmt::Display for NoopStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "noop on channel {}", self.channel)
    }
}

impl RenderPipelineStage for NoopStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InPlace)
    }

    fn process_row(
        &self,
        _input_rows: &InputRows<'_>,
        _output_rows: &mut OutputRows<'_>,
        _xextra: usize,
        _xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
    }
}

pub(crate) struct CopyStage {
    channel: usize,
}

impl CopyStage {
    pub(crate) fn new(channel: usize) -> Self {
        Self { channel }
    }
}

impl std::fmt::Display for CopyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "copy channel {}", self.channel)
    }
}

impl RenderPipelineStage for CopyStage {
    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InOut)
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
        let len = xsize + 2 * xextra;
        output_rows[self.channel][0][..len].copy_from_slice(&input_rows[self.channel][0][..len]);
    }
}

/// Averages a `(2 * border + 1)` square around each pixel.
pub(crate) struct BoxBlurStage {
    channel: usize,
    border: u8,
}

impl BoxBlurStage {
    pub(crate) fn new(channel: usize, border: u8) -> Self {
        Self { channel, border }
    }
}

impl std::fmt::Display for BoxBlurStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "box blur of channel {} with border {}",
            self.channel, self.border
        )
    }
}

impl RenderPipelineStage for BoxBlurStage {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric_border_only(self.border)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InOut)
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
        let side = 2 * self.border as usize + 1;
        let weight = 1.0 / (side * side) as f32;
        let output = &mut output_rows[self.channel][0];
        for (x, out) in output.iter_mut().take(xsize + 2 * xextra).enumerate() {
            let mut sum = 0.0;
            for row in input_rows[self.channel].iter() {
                sum += row[x..x + side].iter().sum::<f32>();
            }
            *out = sum * weight;
        }
    }
}

/// Copies a channel with a border of 2 rows and columns, checking that the pixels outside the
/// frame are mirrored.
struct CheckMirrorStage {
    channel: usize,
    size: (usize, usize),
}

impl std::fmt::Display for CheckMirrorStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "check mirroring of channel {}", self.channel)
    }
}

impl RenderPipelineStage for CheckMirrorStage {
    fn settings(&self) -> StageSettings {
        StageSettings::symmetric_border_only(2)
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(self.channel, c, RenderPipelineChannelMode::InOut)
    }

    fn process_row(
        &self,
        input_rows: &InputRows<'_>,
        output_rows: &mut OutputRows<'_>,
        xextra: usize,
        xsize: usize,
        xpos: usize,
        ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
        let rows = &input_rows[self.channel];
        let first = xextra + 2;
        if ypos == 0 {
            assert_eq!(rows[1], rows[2], "row -1 differs from row 0");
            assert_eq!(rows[0], rows[3], "row -2 differs from row 1");
        }
        if ypos + 1 == self.size.1 {
            assert_eq!(rows[3], rows[2], "row past the end differs from the last row");
            assert_eq!(rows[4], rows[1]);
        }
        if xpos == 0 {
            assert_eq!(rows[2][first - 1], rows[2][first]);
            assert_eq!(rows[2][first - 2], rows[2][first + 1]);
        }
        if xpos + xsize == self.size.0 {
            let last = first + xsize - 1;
            assert_eq!(rows[2][last + 1], rows[2][last]);
            assert_eq!(rows[2][last + 2], rows[2][last - 1]);
        }
        let len = xsize + 2 * xextra;
        output_rows[self.channel][0][..len].copy_from_slice(&rows[2][2..2 + len]);
    }
}

/// Stage with arbitrary settings that copies the center pixels.
struct SettingsStage {
    settings: StageSettings,
    initialized: bool,
}

impl std::fmt::Display for SettingsStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage with settings {:?}", self.settings)
    }
}

impl RenderPipelineStage for SettingsStage {
    fn settings(&self) -> StageSettings {
        self.settings
    }

    fn channel_mode(&self, c: usize) -> RenderPipelineChannelMode {
        single_channel_mode(0, c, RenderPipelineChannelMode::InOut)
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn process_row(
        &self,
        _input_rows: &InputRows<'_>,
        _output_rows: &mut OutputRows<'_>,
        _xextra: usize,
        _xsize: usize,
        _xpos: usize,
        _ypos: usize,
        _state: Option<&mut (dyn Any + Send)>,
    ) {
    }
}

/// Fills every group of `pipeline` with the corresponding area of the images produced by
/// `input`, which is called once per channel with the channel's size. Groups are processed in
/// `order`, or in their natural order if `order` is empty.
pub(crate) fn feed_pipeline(
    pipeline: &mut RenderPipeline,
    order: &[usize],
    input: &dyn Fn(usize, (usize, usize)) -> Result<Image<f32>>,
) -> Result<()> {
    let images = (0..pipeline.num_channels())
        .map(|c| input(c, pipeline.input_size(c)))
        .collect::<Result<Vec<_>>>()?;
    pipeline.prepare_for_threads(1, false)?;
    let order: Vec<usize> = if order.is_empty() {
        (0..pipeline.frame_dimensions().num_groups).collect()
    } else {
        order.to_vec()
    };
    for group_id in order {
        let mut group = pipeline.get_input_buffers(group_id, 0)?;
        for (c, image) in images.iter().enumerate() {
            let rect = group.image_rect(c);
            let (buffer, buffer_rect) = group.get_buffer(c)?;
            copy_image_rect_to(image, rect, buffer, buffer_rect.origin)?;
            group.mark_filled(c);
        }
        group.done()?;
    }
    Ok(())
}

/// Renders a frame through `stages` followed by a [`SaveToImageStage`] of all channels, and
/// returns the saved images.
pub(crate) fn run_pipeline(
    num_channels: usize,
    frame_dimensions: FrameDimensions,
    stages: Vec<Box<dyn RenderPipelineStage>>,
    simple: bool,
    order: &[usize],
    input: &dyn Fn(usize, (usize, usize)) -> Result<Image<f32>>,
) -> Result<Vec<Image<f32>>> {
    let save = SaveToImageStage::new(&(0..num_channels).collect::<Vec<_>>());
    let frame = save.frame();
    let mut builder = RenderPipelineBuilder::new(num_channels, frame_dimensions)
        .use_simple_implementation(simple);
    for stage in stages {
        builder = builder.add_boxed_stage(stage)?;
    }
    let mut pipeline = builder.add_stage(save)?.build()?;
    feed_pipeline(&mut pipeline, order, input)?;
    Ok(frame.take())
}

pub(crate) fn random_input(seed: u64) -> impl Fn(usize, (usize, usize)) -> Result<Image<f32>> {
    move |c, size| {
        let mut rng = XorShiftRng::seed_from_u64(seed.wrapping_add(c as u64));
        Image::<f32>::new_random(size, &mut rng)
    }
}

fn assert_same_output(expected: &[Image<f32>], actual: &[Image<f32>], what: &str) {
    assert_eq!(expected.len(), actual.len());
    for (c, (e, a)) in expected.iter().zip(actual.iter()).enumerate() {
        assert_eq!(e.size(), a.size(), "channel {c}, {what}");
        for y in 0..e.size().1 {
            assert_eq!(e.row(y), a.row(y), "channel {c}, row {y}, {what}");
        }
    }
}

/// Checks that the low-memory implementation produces the same output as the simple one, for
/// several group sizes and group orders.
#[instrument(skip(make_stages), err)]
pub(crate) fn test_stage_consistency(
    num_channels: usize,
    size: (usize, usize),
    make_stages: impl Fn() -> Result<Vec<Box<dyn RenderPipelineStage>>>,
) -> Result<()> {
    let mut rng = XorShiftRng::seed_from_u64(0);
    let input = random_input(0);
    for (log_group_dim, upsampling_shift) in [(8, 0), (5, 0), (4, 1)] {
        let fd = FrameDimensions::new(size, log_group_dim, upsampling_shift)?;
        let reference = run_pipeline(num_channels, fd, make_stages()?, true, &[], &input)?;
        let natural: Vec<usize> = (0..fd.num_groups).collect();
        let mut shuffled = natural.clone();
        shuffled.shuffle(&mut rng);
        let reversed: Vec<usize> = natural.iter().rev().copied().collect();
        for order in [natural, reversed, shuffled] {
            match run_pipeline(num_channels, fd, make_stages()?, false, &order, &input) {
                Err(Error::GroupTooSmallForBorder(..)) => {
                    debug!(log_group_dim, "groups too small for the stages");
                    break;
                }
                result => assert_same_output(
                    &reference,
                    &result?,
                    &format!("log_group_dim {log_group_dim}, upsampling {upsampling_shift}"),
                ),
            }
        }
    }
    Ok(())
}

/// Checks that calling `process_row` twice on the same input gives the same output.
pub(crate) fn check_idempotent(stage: &dyn RenderPipelineStage, num_channels: usize) {
    use RenderPipelineChannelMode::*;
    let mut rng = XorShiftRng::seed_from_u64(0);
    let (bx, by) = stage.settings().border();
    let (sx, sy) = stage.settings().shift();
    let (xsize, xextra) = (37, 3);
    let modes: Vec<_> = (0..num_channels).map(|c| stage.channel_mode(c)).collect();
    let mut random_row = |len: usize| -> Vec<f32> {
        (0..len).map(|_| rng.random_range(-1.0..1.0)).collect()
    };
    let inputs: Vec<Vec<Vec<f32>>> = modes
        .iter()
        .map(|mode| match mode {
            InOut | Input => (0..2 * by + 1)
                .map(|_| random_row(xsize + 2 * (xextra + bx)))
                .collect(),
            InPlace => vec![random_row(xsize + 2 * xextra)],
            Ignored => vec![],
        })
        .collect();

    let run = || -> Vec<Vec<Vec<f32>>> {
        let mut outputs: Vec<Vec<Vec<f32>>> = modes
            .iter()
            .zip(inputs.iter())
            .map(|(mode, input)| match mode {
                InOut => vec![vec![0.0; (xsize + 2 * xextra) << sx]; 1 << sy],
                InPlace => input.clone(),
                _ => vec![],
            })
            .collect();
        let input_rows: Vec<Vec<&[f32]>> = modes
            .iter()
            .zip(inputs.iter())
            .map(|(mode, rows)| match mode {
                InOut | Input => rows.iter().map(|r| r.as_slice()).collect(),
                _ => vec![],
            })
            .collect();
        let mut output_rows: Vec<Vec<&mut [f32]>> = outputs
            .iter_mut()
            .map(|rows| rows.iter_mut().map(|r| r.as_mut_slice()).collect())
            .collect();
        let mut state = stage.init_local_state().expect("failed to create local state");
        stage.process_row(
            &input_rows,
            &mut output_rows,
            xextra,
            xsize,
            5,
            7,
            state.as_deref_mut(),
        );
        drop(output_rows);
        outputs
    };
    assert_eq!(run(), run(), "{stage} is not idempotent");
}

mod random_chains {
    use std::sync::Arc;

    use arbtest::arbitrary::{self, Unstructured};

    use super::*;
    use crate::render::{
        ImageDimensions,
        stages::{
            AddNoiseStage, BlendMode, BlendingStage, ConvolveNoiseStage, EpfStage, EpfStep,
            GaborishStage, HorizontalChromaUpsample, INV_SIGMA_NUM, NearestNeighbourUpsample,
            NoiseParams, VerticalChromaUpsample, YcbcrToRgbStage,
        },
    };

    pub(super) const NUM_CHANNELS: usize = 6;

    #[derive(Clone, Copy, Debug)]
    enum StageSpec {
        UpsampleX(usize),
        UpsampleY(usize),
        Gaborish(usize),
        HorizontalChroma(usize),
        VerticalChroma(usize),
        NearestNeighbour(usize),
        BoxBlur(usize, u8),
        AddConstant(usize),
        AddPosition(usize),
        Ycbcr,
        ConvolveNoise,
        AddNoise,
        Epf(EpfStep),
    }

    /// Per-block sigmas for frames of up to 80x80 pixels.
    fn epf_sigma() -> Arc<Image<f32>> {
        let mut sigma = Image::new((10, 10)).expect("failed to allocate sigma image");
        for by in 0..10 {
            for (bx, v) in sigma.row_mut(by).iter_mut().enumerate() {
                *v = INV_SIGMA_NUM / (0.25 + ((bx * 5 + by * 3) % 7) as f32 * 0.15);
            }
        }
        Arc::new(sigma)
    }

    impl StageSpec {
        fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<StageSpec> {
            let c = u.int_in_range(0..=NUM_CHANNELS - 1)?;
            Ok(match u.int_in_range(0..=12)? {
                0 => StageSpec::UpsampleX(c),
                1 => StageSpec::UpsampleY(c),
                2 => StageSpec::Gaborish(c),
                3 => StageSpec::HorizontalChroma(c),
                4 => StageSpec::VerticalChroma(c),
                5 => StageSpec::NearestNeighbour(c),
                6 => StageSpec::BoxBlur(c, u.int_in_range(1..=3)?),
                7 => StageSpec::AddConstant(c),
                8 => StageSpec::AddPosition(c),
                9 => StageSpec::Ycbcr,
                10 => StageSpec::ConvolveNoise,
                11 => StageSpec::AddNoise,
                _ => StageSpec::Epf(*u.choose(&[EpfStep::Step0, EpfStep::Step1, EpfStep::Step2])?),
            })
        }

        fn create(&self) -> Box<dyn RenderPipelineStage> {
            match *self {
                StageSpec::UpsampleX(c) => Box::new(UpsampleXSlowStage::new(c)),
                StageSpec::UpsampleY(c) => Box::new(UpsampleYSlowStage::new(c)),
                StageSpec::Gaborish(c) => {
                    Box::new(GaborishStage::new(c, 0.115169525, 0.061248592))
                }
                StageSpec::HorizontalChroma(c) => Box::new(HorizontalChromaUpsample::new(c)),
                StageSpec::VerticalChroma(c) => Box::new(VerticalChromaUpsample::new(c)),
                StageSpec::NearestNeighbour(c) => Box::new(NearestNeighbourUpsample::new(c)),
                StageSpec::BoxBlur(c, border) => Box::new(BoxBlurStage::new(c, border)),
                StageSpec::AddConstant(c) => Box::new(AddConstantStage::new(c, 0.25)),
                StageSpec::AddPosition(c) => Box::new(AddPositionStage::new(c)),
                StageSpec::Ycbcr => Box::new(YcbcrToRgbStage::new(0)),
                StageSpec::ConvolveNoise => Box::new(ConvolveNoiseStage::new(3)),
                StageSpec::AddNoise => Box::new(AddNoiseStage::new(
                    NoiseParams {
                        lut: [0.1, 0.5, 0.3, 0.9, 0.7, 0.2, 0.4, 0.6],
                    },
                    0.25,
                    1.1,
                    3,
                )),
                StageSpec::Epf(step) => Box::new(EpfStage::new(
                    step,
                    0.9,
                    2.0 / 3.0,
                    [40.0, 5.0, 3.5],
                    epf_sigma(),
                )),
            }
        }
    }

    #[derive(Debug)]
    struct Blending {
        mode: BlendMode,
        dimensions: ImageDimensions,
        with_background: bool,
        then_add_position: bool,
    }

    #[derive(Debug)]
    pub(super) struct Chain {
        stages: Vec<StageSpec>,
        blending: Option<Blending>,
        pub(super) frame_dimensions: FrameDimensions,
        pub(super) seed: u64,
    }

    impl Chain {
        pub(super) fn arbitrary(u: &mut Unstructured<'_>) -> arbitrary::Result<Chain> {
            let size = (u.int_in_range(1..=80)?, u.int_in_range(1..=80)?);
            let log_group_dim = u.int_in_range(3..=5)?;
            let upsampling_shift = u.int_in_range(0..=1)?;
            let num_stages = u.int_in_range(1..=5)?;
            let stages = (0..num_stages)
                .map(|_| StageSpec::arbitrary(u))
                .collect::<arbitrary::Result<Vec<_>>>()?;
            let blending = if u.arbitrary()? {
                Some(Blending {
                    mode: if u.arbitrary()? {
                        BlendMode::Add
                    } else {
                        BlendMode::Replace
                    },
                    dimensions: ImageDimensions {
                        image_size: (u.int_in_range(1..=80)?, u.int_in_range(1..=80)?),
                        frame_origin: (u.int_in_range(-40..=40)?, u.int_in_range(-40..=40)?),
                    },
                    with_background: u.arbitrary()?,
                    then_add_position: u.arbitrary()?,
                })
            } else {
                None
            };
            Ok(Chain {
                stages,
                blending,
                frame_dimensions: FrameDimensions::new(size, log_group_dim, upsampling_shift)
                    .expect("valid frame dimensions"),
                seed: u.arbitrary()?,
            })
        }

        pub(super) fn create(&self) -> Result<Vec<Box<dyn RenderPipelineStage>>> {
            let mut stages: Vec<_> = self.stages.iter().map(|s| s.create()).collect();
            if let Some(blending) = &self.blending {
                let background = if blending.with_background {
                    let input = random_input(self.seed ^ 0xb4c6);
                    let images = (0..NUM_CHANNELS)
                        .map(|c| input(c, blending.dimensions.image_size))
                        .collect::<Result<Vec<_>>>()?;
                    Some(Arc::new(images))
                } else {
                    None
                };
                stages.push(Box::new(BlendingStage::new(
                    blending.mode,
                    blending.dimensions,
                    NUM_CHANNELS,
                    background,
                )));
                if blending.then_add_position {
                    stages.push(Box::new(AddPositionStage::new(1)));
                }
            }
            Ok(stages)
        }
    }
}

mod tests {
    use test_log::test;

    use super::random_chains::{Chain, NUM_CHANNELS};
    use super::*;
    use crate::options::RenderPipelineOptions;
    use crate::render::run_groups;
    use crate::util::test::assert_almost_eq;

    #[test]
    fn simple_and_low_memory_agree() {
        arbtest::arbtest(|u| {
            let chain = Chain::arbitrary(u)?;
            let fd = chain.frame_dimensions;
            let input = random_input(chain.seed);
            let reference = match run_pipeline(
                NUM_CHANNELS,
                fd,
                chain.create().unwrap(),
                true,
                &[],
                &input,
            ) {
                Err(
                    Error::MismatchedChannelShifts(..)
                    | Error::ChannelShiftTooLarge(..)
                    | Error::InOutAfterImageDimensionSwitch(..),
                ) => return Ok(()),
                result => result.unwrap(),
            };
            let mut order: Vec<usize> = (0..fd.num_groups).collect();
            order.shuffle(&mut XorShiftRng::seed_from_u64(chain.seed));
            let stages = chain.create().unwrap();
            match run_pipeline(NUM_CHANNELS, fd, stages, false, &order, &input) {
                Err(Error::GroupTooSmallForBorder(..)) => {}
                result => assert_same_output(&reference, &result.unwrap(), &format!("{chain:?}")),
            }
            Ok(())
        });
    }

    #[test]
    fn mirrored_borders() -> Result<()> {
        for simple in [true, false] {
            for (size, log_group_dim) in [((20, 13), 3), ((64, 64), 4), ((5, 7), 8)] {
                let stage = CheckMirrorStage { channel: 0, size };
                let fd = FrameDimensions::new(size, log_group_dim, 0)?;
                let mut pipeline = RenderPipelineBuilder::new(1, fd)
                    .use_simple_implementation(simple)
                    .add_stage(stage)?
                    .add_stage(SaveToImageStage::new(&[0]))?
                    .build()?;
                feed_pipeline(&mut pipeline, &[], &random_input(1))?;
            }
        }
        Ok(())
    }

    #[test]
    fn mirror_check_runs() -> Result<()> {
        let stage = CheckMirrorStage {
            channel: 0,
            size: (9, 9),
        };
        let fd = FrameDimensions::new((9, 9), 3, 0)?;
        let input = random_input(5);
        let frame = Image::<f32>::new_random((9, 9), &mut XorShiftRng::seed_from_u64(5))?;
        let output = run_pipeline(1, fd, vec![Box::new(stage)], false, &[3, 1, 0, 2], &input)?;
        assert_same_output(&[frame], &output, "copy with border 2");
        Ok(())
    }

    #[test]
    fn idempotent_test_stages() {
        check_idempotent(&UpsampleXSlowStage::new(0), 1);
        check_idempotent(&UpsampleYSlowStage::new(1), 2);
        check_idempotent(&BoxBlurStage::new(0, 2), 1);
        check_idempotent(&CopyStage::new(0), 1);
        check_idempotent(&AddConstantStage::new(0, 1.5), 1);
        check_idempotent(&AddPositionStage::new(0), 1);
    }

    #[test]
    fn in_place_noops_are_identity() -> Result<()> {
        let fd = FrameDimensions::new((300, 200), 7, 0)?;
        let input = random_input(3);
        let expected = (0..3)
            .map(|c| input(c, (300, 200)))
            .collect::<Result<Vec<_>>>()?;
        for simple in [true, false] {
            let output = run_pipeline(
                3,
                fd,
                vec![
                    Box::new(NoopStage::new(0)),
                    Box::new(NoopStage::new(1)),
                    Box::new(NoopStage::new(2)),
                ],
                simple,
                &[5, 0, 3, 1, 4, 2],
                &input,
            )?;
            assert_same_output(&expected, &output, "noop stages");
        }
        Ok(())
    }

    #[test]
    fn blur_across_group_seams() -> Result<()> {
        let fd = FrameDimensions::new((300, 300), 8, 0)?;
        let input = random_input(4);
        let image = input(0, (300, 300))?;
        let blur = || -> Vec<Box<dyn RenderPipelineStage>> {
            vec![Box::new(BoxBlurStage::new(0, 1))]
        };
        let reference = run_pipeline(1, fd, blur(), true, &[], &input)?;
        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [1, 2, 0, 3]] {
            let output = run_pipeline(1, fd, blur(), false, &order, &input)?;
            assert_same_output(&reference, &output, &format!("order {order:?}"));
        }
        // Pixels next to the seams between groups.
        for (x, y) in [(255, 255), (256, 100), (1, 298)] {
            let mut expected = 0.0f32;
            for yy in y - 1..y + 2 {
                expected += image.row(yy)[x - 1..x + 2].iter().sum::<f32>();
            }
            assert_almost_eq!(reference[0].row(y)[x], expected / 9.0, 1e-5);
        }
        Ok(())
    }

    #[test]
    fn horizontal_shift_doubles_row() -> Result<()> {
        let fd = FrameDimensions::new((16, 1), 8, 0)?;
        let ramp = |_: usize, size: (usize, usize)| -> Result<Image<f32>> {
            assert_eq!(size, (8, 1));
            let mut image = Image::new(size)?;
            for (x, v) in image.row_mut(0).iter_mut().enumerate() {
                *v = x as f32;
            }
            Ok(image)
        };
        for simple in [true, false] {
            let stages: Vec<Box<dyn RenderPipelineStage>> =
                vec![Box::new(UpsampleXSlowStage::new(0))];
            let output = run_pipeline(1, fd, stages, simple, &[], &ramp)?;
            assert_eq!(output[0].size(), (16, 1));
            let expected: Vec<f32> = (0..16)
                .map(|x| if x == 15 { 7.0 } else { x as f32 * 0.5 })
                .collect();
            assert_eq!(output[0].row(0), &expected[..]);
        }
        Ok(())
    }

    #[test]
    fn passes_with_all_input() -> Result<()> {
        for simple in [true, false] {
            let fd = FrameDimensions::new((100, 70), 5, 0)?;
            let mut pipeline = RenderPipelineBuilder::new(1, fd)
                .use_simple_implementation(simple)
                .add_stage(BoxBlurStage::new(0, 1))?
                .add_stage(SaveToImageStage::new(&[0]))?
                .build()?;
            assert_eq!(pipeline.passes_with_all_input(), 0);
            feed_pipeline(&mut pipeline, &[], &random_input(0))?;
            assert_eq!(pipeline.passes_with_all_input(), 1);
            assert!(pipeline.truncated_groups().is_empty());
        }
        Ok(())
    }

    fn build_error(stages: Vec<Box<dyn RenderPipelineStage>>) -> Error {
        let fd = FrameDimensions::new((64, 64), 8, 0).expect("valid frame dimensions");
        let mut builder = RenderPipelineBuilder::new(1, fd);
        for stage in stages {
            builder = match builder.add_boxed_stage(stage) {
                Ok(builder) => builder,
                Err(err) => return err,
            };
        }
        match builder.build() {
            Ok(_) => panic!("pipeline built successfully"),
            Err(err) => err,
        }
    }

    #[test]
    fn invalid_pipelines() {
        use crate::render::{
            ImageDimensions,
            stages::{BlendMode, BlendingStage},
        };
        let blending = || -> Box<dyn RenderPipelineStage> {
            Box::new(BlendingStage::new(
                BlendMode::Replace,
                ImageDimensions {
                    image_size: (64, 64),
                    frame_origin: (0, 0),
                },
                1,
                None,
            ))
        };
        let save = || -> Box<dyn RenderPipelineStage> { Box::new(SaveToImageStage::new(&[0])) };

        assert!(matches!(build_error(vec![]), Error::EmptyPipeline));
        assert!(matches!(
            build_error(vec![Box::new(CopyStage::new(0))]),
            Error::PipelineEndsWithInOut(..)
        ));
        assert!(matches!(
            build_error(vec![
                Box::new(SettingsStage {
                    settings: StageSettings::none(),
                    initialized: false,
                }),
                save(),
            ]),
            Error::StageNotInitialized(..)
        ));
        assert!(matches!(
            build_error(vec![blending(), blending(), save()]),
            Error::MultipleImageDimensionSwitches(..)
        ));
        assert!(matches!(
            build_error(vec![blending(), Box::new(CopyStage::new(0)), save()]),
            Error::InOutAfterImageDimensionSwitch(..)
        ));
        assert!(matches!(
            build_error(vec![Box::new(BoxBlurStage::new(0, 9)), save()]),
            Error::StageBorderTooLarge(..)
        ));
        assert!(matches!(
            build_error(vec![
                Box::new(SettingsStage {
                    settings: StageSettings::symmetric(4, 0),
                    initialized: true,
                }),
                save(),
            ]),
            Error::StageShiftTooLarge(..)
        ));
        assert!(matches!(
            build_error(vec![Box::new(NoopStage::new(3)), save()]),
            Error::StageUsesNoChannels(..)
        ));
    }

    #[test]
    fn run_groups_matches_sequential_feeding() -> Result<()> {
        let fd = FrameDimensions::new((200, 150), 5, 0)?;
        let input = random_input(9);
        let images = (0..2)
            .map(|c| input(c, if c == 0 { (100, 150) } else { (200, 150) }))
            .collect::<Result<Vec<_>>>()?;
        let make_stages = || -> Vec<Box<dyn RenderPipelineStage>> {
            vec![
                Box::new(UpsampleXSlowStage::new(0)),
                Box::new(BoxBlurStage::new(1, 2)),
                Box::new(AddPositionStage::new(0)),
            ]
        };
        let reference = run_pipeline(2, fd, make_stages(), true, &[], &input)?;

        for use_group_ids in [false, true] {
            let options = RenderPipelineOptions {
                use_simple_implementation: false,
                use_group_ids,
                num_threads: Some(4),
            };
            let save = SaveToImageStage::new(&[0, 1]);
            let frame = save.frame();
            let mut builder = RenderPipelineBuilder::new(2, fd).with_options(&options);
            for stage in make_stages() {
                builder = builder.add_boxed_stage(stage)?;
            }
            let mut pipeline = builder.add_stage(save)?.build()?;
            run_groups(&mut pipeline, &options, |_, group| {
                for (c, image) in images.iter().enumerate() {
                    let rect = group.image_rect(c);
                    let (buffer, buffer_rect) = group.get_buffer(c)?;
                    copy_image_rect_to(image, rect, buffer, buffer_rect.origin)?;
                    group.mark_filled(c);
                }
                Ok(())
            })?;
            assert_eq!(pipeline.passes_with_all_input(), 1);
            assert_same_output(&reference, &frame.take(), "run_groups");
        }
        Ok(())
    }
}
