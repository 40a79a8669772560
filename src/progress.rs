//! Progress bars for whole-vocabulary passes.

use std::time::Duration;

use indicatif::{style::TemplateError, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Creates a progress bar for `size` items.
///
/// When `visible` is false the bar is created with a hidden draw target so
/// callers can drive it unconditionally.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the progress bar style template is invalid.
pub(crate) fn progress_bar(
    size: usize,
    msg: impl Into<String>,
    visible: bool,
) -> Result<ProgressBar, TemplateError> {
    let pb = ProgressBar::new(size as u64);

    if !visible {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return Ok(pb);
    }

    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {msg:<30!} {wide_bar} {pos}/{len}")?;

    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_secs(1));

    Ok(pb)
}
