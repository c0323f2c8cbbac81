//! Path template substitution
//!
//! Output table paths are written as templates in the configuration file:
//! - `{date}` and `{models}` are substituted once, when the configuration loads
//! - `{source}` is substituted per table, with the source directory that owns
//!   the image being annotated

use chrono::{Datelike, NaiveDate};

/// Placeholder replaced by the owning source directory
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Placeholder replaced by the load date
pub const DATE_PLACEHOLDER: &str = "{date}";

/// Placeholder replaced by the short names of every data source template
pub const MODELS_PLACEHOLDER: &str = "{models}";

/// Output template used when the configuration does not name one
pub const DEFAULT_OUTPUT_FORMAT: &str = "Inference/{date}_{models}";

/// Substitute `{source}` in a table naming template
pub fn substitute_source(template: &str, source: &str) -> String {
    template.replace(SOURCE_PLACEHOLDER, source)
}

/// Format a date as `YYYY_MM_DD`
pub fn format_date(date: NaiveDate) -> String {
    format!("{:04}_{:02}_{:02}", date.year(), date.month(), date.day())
}

/// Shortened name for a data source template
///
/// Takes the first letter of every `_`-separated word of every `/`-separated
/// component and upper-cases the result. A trailing wildcard is dropped and
/// any other wildcard becomes `all`.
///
/// `EPySegRaw/EPySegRaw_3/*` → `EE3`
pub fn model_name(source_template: &str) -> String {
    let mut name = String::new();
    for dirname in source_template.split('/') {
        for noun in dirname.split('_') {
            if let Some(first) = noun.chars().next() {
                name.push(first);
            }
        }
    }
    if name.ends_with('*') {
        name.pop();
    }
    name.to_uppercase().replace('*', "all")
}

/// Apply the load-time substitutions (`{date}`, `{models}`) to an output template
///
/// `{source}` is left untouched.
pub fn expand_output_format(format: &str, today: NaiveDate, source_templates: &[String]) -> String {
    let mut output = format.replace(DATE_PLACEHOLDER, &format_date(today));
    if output.contains(MODELS_PLACEHOLDER) {
        let models = source_templates
            .iter()
            .map(|s| model_name(s))
            .collect::<Vec<_>>()
            .join("_");
        output = output.replace(MODELS_PLACEHOLDER, &models);
    }
    output
}

/// Resolve a possibly relative path against the working directory
///
/// `work_dir` is expected to end with `/`. Templates that begin with
/// `{source}` are already absolute once substituted and are returned as is.
pub fn to_absolute(work_dir: &str, path: &str) -> String {
    if path.starts_with(SOURCE_PLACEHOLDER) || std::path::Path::new(path).is_absolute() {
        path.to_string()
    } else {
        format!("{}{}", work_dir, path)
    }
}
