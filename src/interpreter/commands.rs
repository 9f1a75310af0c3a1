//! MATLAB command construction
//!
//! Every interpreter-native command string the engine emits is built
//! here, so callers and tests agree on one vocabulary. Paths and other
//! embedded strings go through [`escape_single_quotes`] before landing
//! inside interpreter string literals.

use std::path::Path;

/// Close every open figure
pub(crate) const CLOSE_ALL: &str = "close all";

/// Trivial probe command used to detect stale connections
pub(crate) const VERSION: &str = "version";

/// Variable listing expression (name, size, bytes, class per variable)
pub(crate) const WHO_LISTING: &str = "whos";

/// Number of currently open figures
pub(crate) const FIGURE_COUNT: &str = "numel(get(groot, 'Children'))";

/// Double embedded single quotes per interpreter string-literal rules
pub(crate) fn escape_single_quotes(raw: &str) -> String {
    raw.replace('\'', "''")
}

pub(crate) fn add_path(dir: &Path) -> String {
    format!("addpath('{}')", escape_single_quotes(&dir.display().to_string()))
}

pub(crate) fn run_file(path: &Path) -> String {
    format!("run('{}')", escape_single_quotes(&path.display().to_string()))
}

pub(crate) fn clear_variable(name: &str) -> String {
    format!("clear {name}")
}

/// `[min max mean]` over the flattened array
pub(crate) fn array_stats(name: &str) -> String {
    format!("[min({name}(:)) max({name}(:)) mean({name}(:))]")
}

/// Leading `count` elements as a row vector (1-based linear indexing)
pub(crate) fn array_sample(name: &str, count: usize) -> String {
    format!("reshape({name}(1:{count}), 1, [])")
}

/// Print a variable for the stringified fallback path
pub(crate) fn display_value(name: &str) -> String {
    format!("disp({name})")
}

/// Plain raster render of figure `handle` (1-based)
pub(crate) fn save_png(handle: usize, path: &Path) -> String {
    format!(
        "saveas(figure({handle}), '{}')",
        escape_single_quotes(&path.display().to_string())
    )
}

/// Vector render; the painters renderer guarantees true vector output
pub(crate) fn save_svg(handle: usize, path: &Path) -> String {
    let escaped = escape_single_quotes(&path.display().to_string());
    format!(
        "set(figure({handle}), 'Renderer', 'painters'); saveas(figure({handle}), '{escaped}', 'svg')"
    )
}

/// Quality-driven raster render with explicit print parameters
pub(crate) fn print_png(
    handle: usize,
    path: &Path,
    dpi: u32,
    renderer: &str,
    loose: bool,
    smoothing: bool,
) -> String {
    let escaped = escape_single_quotes(&path.display().to_string());
    let smoothing = if smoothing { "on" } else { "off" };
    let loose = if loose { ", '-loose'" } else { "" };
    format!(
        "set(figure({handle}), 'GraphicsSmoothing', '{smoothing}'); \
         print(figure({handle}), '{escaped}', '-dpng', '-r{dpi}', '{renderer}'{loose})"
    )
}

/// `[has_raster_content patch_count]` probe for content-based quality
/// overrides
pub(crate) fn content_probe(handle: usize) -> String {
    format!(
        "[double(~isempty(findobj(figure({handle}), 'Type', 'image')) || \
         ~isempty(findobj(figure({handle}), 'Type', 'surface'))) \
         numel(findobj(figure({handle}), 'Type', 'patch'))]"
    )
}
