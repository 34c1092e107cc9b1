//! Helpers for rendering samples in the text [exposition format], version 0.0.4.
//!
//! [exposition format]: https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md#text-format-details
use lightmetric::{format_float, MetricFamilySamples, MetricType, Sample};

/// Content type of payloads produced by [`render`].
pub const CONTENT_TYPE_004: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Renders metric families, in order.
///
/// Each family starts with its help and type lines, followed by one line per sample.
pub fn render(families: &[MetricFamilySamples]) -> String {
    let mut buffer = String::new();
    for family in families {
        write_help_line(&mut buffer, &family.name, &family.help);
        write_type_line(&mut buffer, &family.name, family.metric_type);
        for sample in &family.samples {
            write_sample_line(&mut buffer, sample);
        }
    }

    buffer
}

/// Writes a help (description) line.
pub fn write_help_line(buffer: &mut String, name: &str, help: &str) {
    buffer.push_str("# HELP ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(&escape_help(help));
    buffer.push('\n');
}

/// Writes a metric type line.
pub fn write_type_line(buffer: &mut String, name: &str, metric_type: MetricType) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type.as_str());
    buffer.push('\n');
}

/// Writes a sample line.
///
/// Labels are written in the order of the sample, and are left out entirely when the sample has
/// none.
pub fn write_sample_line(buffer: &mut String, sample: &Sample) {
    buffer.push_str(&sample.name);

    if !sample.label_names.is_empty() {
        buffer.push('{');
        for (i, (name, value)) in sample.label_names.iter().zip(&sample.label_values).enumerate() {
            if i > 0 {
                buffer.push(',');
            }
            buffer.push_str(name);
            buffer.push_str("=\"");
            buffer.push_str(&escape_label_value(value));
            buffer.push('"');
        }
        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(&format_float(sample.value));
    buffer.push('\n');
}

/// Escapes a help text: backslashes and line feeds.
pub fn escape_help(help: &str) -> String {
    escape(help, false)
}

/// Escapes a label value: backslashes, double quotes and line feeds.
pub fn escape_label_value(value: &str) -> String {
    escape(value, true)
}

fn escape(value: &str, quotes: bool) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '"' if quotes => escaped.push_str("\\\""),
            c => escaped.push(c),
        }
    }

    escaped
}
