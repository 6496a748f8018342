// Copyright (c) the JPEG XL Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

/// Build-time and scheduling options of a render pipeline.
#[derive(Debug, Clone, Default)]
pub struct RenderPipelineOptions {
    /// Render the whole frame at once, once every group has been supplied, instead of
    /// streaming one group at a time. Uses memory proportional to the frame size; meant for
    /// small images and as a reference for testing.
    /// Default: false
    pub use_simple_implementation: bool,
    /// Index input buffers by group instead of by thread, so that the thread that fills a
    /// group need not be the one that completes it.
    /// Default: false
    pub use_group_ids: bool,
    /// Number of threads used by [`crate::render::run_groups`].
    /// Set to `None` to use as many threads as the global thread pool has.
    /// Default: `None`
    pub num_threads: Option<usize>,
}

impl RenderPipelineOptions {
    /// Options selecting the full-frame reference implementation.
    pub fn simple() -> Self {
        Self {
            use_simple_implementation: true,
            ..Self::default()
        }
    }
}
