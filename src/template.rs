use chrono::{Local, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

use crate::model::{DateFormat, Recorder, TemplateKind};

static NON_ALPHANUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

/// Name used when every part of a template ends up empty.
pub const FALLBACK_TAKE_NAME: &str = "TAKE";

/// Replace every character outside `[a-zA-Z0-9]` with `_`.
pub fn sanitize(name: &str) -> String {
    NON_ALPHANUMERIC.replace_all(name, "_").into_owned()
}

pub fn format_date(format: DateFormat, at: &NaiveDateTime) -> String {
    at.format(format.pattern()).to_string()
}

/// Today's date (or time) in the given pattern, from local time
pub fn formatted_date(format: DateFormat) -> String {
    format_date(format, &Local::now().naive_local())
}

/// Build a take name for the recorder from its template, using local time
pub fn generate(recorder: &Recorder, show_name: &str, date_format: DateFormat) -> String {
    generate_at(recorder, show_name, date_format, &Local::now().naive_local())
}

/// Build a take name for the recorder at an explicit point in time
///
/// Parts come from the recorder's selected template:
/// - Show: show name, date
/// - Take: show name, date, `S<NN>`, custom text, `T<NN>`
/// - Custom: custom text only
///
/// A part is skipped when its toggle is explicitly false or its value is empty.
pub fn generate_at(
    recorder: &Recorder,
    show_name: &str,
    date_format: DateFormat,
    at: &NaiveDateTime,
) -> String {
    let include = |toggle: Option<bool>| toggle != Some(false);
    let mut parts: Vec<String> = Vec::new();

    let mut push = |enabled: Option<bool>, value: String| {
        if include(enabled) && !value.is_empty() {
            parts.push(value);
        }
    };

    match recorder.template_kind() {
        Some(TemplateKind::Show) => {
            push(recorder.include_show, show_name.to_string());
            push(recorder.include_date, format_date(date_format, at));
        }
        Some(TemplateKind::Take) => {
            push(recorder.include_show, show_name.to_string());
            push(recorder.include_date, format_date(date_format, at));
            push(
                recorder.include_shot_take,
                format!("S{:02}", recorder.shot_number),
            );
            push(recorder.include_custom, recorder.custom_text.clone());
            push(
                recorder.include_shot_take,
                format!("T{:02}", recorder.take_number),
            );
        }
        Some(TemplateKind::Custom) => {
            push(recorder.include_custom, recorder.custom_text.clone());
        }
        None => {}
    }

    if parts.is_empty() {
        FALLBACK_TAKE_NAME.to_string()
    } else {
        parts.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn new_year() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap()
    }

    fn take_recorder() -> Recorder {
        let mut recorder = Recorder::new("r1", "HYPER-41", "10.0.0.41");
        recorder.selected_template = "2".to_string();
        recorder.shot_number = 3;
        recorder.take_number = 5;
        recorder.custom_text = "X".to_string();
        recorder
    }

    #[test]
    fn test_take_template() {
        let name = generate_at(&take_recorder(), "DEMO", DateFormat::YearMonthDay, &new_year());
        assert_eq!(name, "DEMO_20250101_S03_X_T05");
    }

    #[test]
    fn test_show_template_is_default() {
        let recorder = Recorder::new("r1", "A", "");
        let name = generate_at(&recorder, "NEWS", DateFormat::IsoDate, &new_year());
        assert_eq!(name, "NEWS_2025-01-01");
    }

    #[test]
    fn test_custom_template_only_custom_text() {
        let mut recorder = take_recorder();
        recorder.selected_template = "3".to_string();
        recorder.custom_text = "Interview".to_string();
        let name = generate_at(&recorder, "DEMO", DateFormat::YearMonthDay, &new_year());
        assert_eq!(name, "Interview");
    }

    #[test]
    fn test_toggles_drop_parts() {
        let mut recorder = take_recorder();
        recorder.include_show = Some(false);
        recorder.include_date = Some(false);
        let name = generate_at(&recorder, "DEMO", DateFormat::YearMonthDay, &new_year());
        assert_eq!(name, "S03_X_T05");

        recorder.include_shot_take = Some(false);
        recorder.include_custom = Some(true);
        let name = generate_at(&recorder, "DEMO", DateFormat::YearMonthDay, &new_year());
        assert_eq!(name, "X");
    }

    #[test]
    fn test_empty_parts_fall_back() {
        let mut recorder = Recorder::new("r1", "A", "");
        recorder.selected_template = "3".to_string();
        assert_eq!(
            generate_at(&recorder, "DEMO", DateFormat::YearMonthDay, &new_year()),
            "TAKE"
        );

        recorder.selected_template = "1".to_string();
        recorder.include_date = Some(false);
        assert_eq!(
            generate_at(&recorder, "", DateFormat::YearMonthDay, &new_year()),
            "TAKE"
        );
    }

    #[test]
    fn test_unknown_template_id_falls_back() {
        let mut recorder = Recorder::new("r1", "A", "");
        recorder.selected_template = "9".to_string();
        assert_eq!(
            generate_at(&recorder, "DEMO", DateFormat::YearMonthDay, &new_year()),
            "TAKE"
        );
    }

    #[test]
    fn test_date_patterns() {
        let at = new_year();
        let cases = [
            (DateFormat::YearMonthDay, "20250101"),
            (DateFormat::MonthDayYear, "01012025"),
            (DateFormat::DayMonthYear, "01012025"),
            (DateFormat::IsoDate, "2025-01-01"),
            (DateFormat::YearMonthDayHourMinute, "202501010905"),
            (DateFormat::DateDashTime, "20250101-0905"),
            (DateFormat::DateUnderscoreTime, "20250101_0905"),
            (DateFormat::IsoDateTime, "2025-01-01-0905"),
            (DateFormat::TimeOnly, "090507"),
        ];
        for (format, expected) in cases {
            assert_eq!(format_date(format, &at), expected, "{}", format.label());
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("HYPER-41"), "HYPER_41");
        assert_eq!(sanitize("Cam A/2"), "Cam_A_2");
        assert_eq!(sanitize("plain"), "plain");
        assert_eq!(sanitize("é"), "_");
    }
}
