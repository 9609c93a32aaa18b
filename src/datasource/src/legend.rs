//! Series naming from legend templates.

use std::collections::BTreeMap;

use grafana_plugin_sdk::data;
use prom_api::METRIC_NAME_LABEL;

pub type Labels = BTreeMap<String, String>;

/// Legend template asking for the canonical label-set name
pub const LEGEND_FORMAT_AUTO: &str = "__auto";

const EMPTY_LABELS: &str = "{}";

/// Canonical form of a label set: `name{a="1",b="2"}`.
///
/// Labels are sorted and the metric name is left out of the braces. Returns
/// the bare name when no other label is set, and `{}` when there is nothing at all.
pub fn labels_to_string(labels: &Labels) -> String {
    let name = labels
        .get(METRIC_NAME_LABEL)
        .map(String::as_str)
        .unwrap_or_default();

    let mut pairs: Vec<String> = labels
        .iter()
        .filter(|(key, _)| key.as_str() != METRIC_NAME_LABEL)
        .map(|(key, value)| format!("{key}={value:?}"))
        .collect();
    pairs.sort();

    match (name.is_empty(), pairs.is_empty()) {
        (true, true) => EMPTY_LABELS.to_string(),
        (false, true) => name.to_string(),
        _ => format!("{name}{{{}}}", pairs.join(",")),
    }
}

/// Display name of a series.
///
/// An empty template or [`LEGEND_FORMAT_AUTO`] renders the canonical label
/// set. Otherwise every `{{ label }}` is replaced by the label value, or by
/// nothing when the label is absent. Falls back to `expr` when the result
/// carries no usable name.
pub fn format_legend(template: &str, labels: &Labels, expr: &str) -> String {
    if template.is_empty() || template == LEGEND_FORMAT_AUTO {
        let canonical = labels_to_string(labels);
        if canonical == EMPTY_LABELS {
            return expr.to_string();
        }
        return canonical;
    }

    let rendered = substitute_labels(template, labels);
    if rendered.is_empty() {
        return expr.to_string();
    }
    rendered
}

fn substitute_labels(template: &str, labels: &Labels) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let inner_start = open + 2;
        // A label reference needs at least one character between the braces
        let close = rest[inner_start..]
            .chars()
            .next()
            .map(|c| inner_start + c.len_utf8())
            .and_then(|search| rest[search..].find("}}").map(|pos| pos + search));

        let Some(close) = close else {
            break;
        };

        rendered.push_str(&rest[..open]);
        let label = rest[inner_start..close].trim();
        if let Some(value) = labels.get(label) {
            rendered.push_str(value);
        }
        rest = &rest[close + 2..];
    }
    rendered.push_str(rest);

    rendered
}

/// Names the value field of `frame`; frames with fewer than two fields are left as they are
pub fn apply_legend(frame: &mut data::Frame, template: &str, expr: &str) {
    let Some(value) = frame.fields_mut().get_mut(1) else {
        return;
    };

    let labels: Labels = value
        .labels
        .iter()
        .map(|(key, val)| (key.clone(), val.clone()))
        .collect();
    let name = format_legend(template, &labels, expr);
    if !name.is_empty() {
        value
            .config
            .get_or_insert_with(Default::default)
            .display_name_from_ds = Some(name.clone());
    }
    frame.name = name;
}
