/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! Reference-time layouts (`2006-01-02 15:04:05`) as used in the `Layout*`
//! configuration fields, translated once into `chrono` format strings.

use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

// Longest tokens first, so `2006` wins over `2` and `January` over `Jan`.
const TOKENS: &[(&str, &str, Kind)] = &[
    ("January", "%B", Kind::Date),
    ("Monday", "%A", Kind::Date),
    ("Z07:00", "%#z", Kind::Offset),
    ("-07:00", "%:z", Kind::Offset),
    ("-0700", "%z", Kind::Offset),
    ("2006", "%Y", Kind::Date),
    ("Jan", "%b", Kind::Date),
    ("Mon", "%a", Kind::Date),
    ("MST", "", Kind::Unsupported),
    ("002", "%j", Kind::Date),
    ("_2", "%e", Kind::Date),
    ("01", "%m", Kind::Date),
    ("02", "%d", Kind::Date),
    ("03", "%I", Kind::Time),
    ("04", "%M", Kind::Time),
    ("05", "%S", Kind::Time),
    ("06", "%y", Kind::Date),
    ("15", "%H", Kind::Time),
    ("PM", "%p", Kind::Time),
    ("pm", "%P", Kind::Time),
    ("1", "%m", Kind::Date),
    ("2", "%d", Kind::Date),
    ("3", "%I", Kind::Time),
    ("4", "%M", Kind::Time),
    ("5", "%S", Kind::Time),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Date,
    Time,
    Offset,
    Unsupported,
}

/// A translated layout. Layouts without an offset are read as UTC, layouts
/// without a time of day as midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLayout {
    source: String,
    format: String,
    has_time: bool,
    has_offset: bool,
}

impl TimeLayout {
    pub fn parse_layout(layout: &str) -> Result<Self, ConfigError> {
        let mut format = String::with_capacity(layout.len() * 2);
        let mut has_time = false;
        let mut has_offset = false;
        let mut rest = layout;

        'scan: while !rest.is_empty() {
            if let Some(fraction) = fractional_seconds(rest) {
                format.push_str("%.f");
                has_time = true;
                rest = &rest[fraction..];
                continue;
            }
            for (token, replacement, kind) in TOKENS {
                if !rest.starts_with(token) {
                    continue;
                }
                match kind {
                    Kind::Unsupported => {
                        return Err(ConfigError::UnsupportedLayout {
                            layout: layout.to_owned(),
                            token: (*token).to_owned(),
                        });
                    }
                    Kind::Time => has_time = true,
                    Kind::Offset => {
                        has_time = true;
                        has_offset = true;
                    }
                    Kind::Date => {}
                }
                format.push_str(replacement);
                rest = &rest[token.len()..];
                continue 'scan;
            }
            let mut chars = rest.chars();
            if let Some(literal) = chars.next() {
                if literal == '%' {
                    format.push_str("%%");
                } else {
                    format.push(literal);
                }
            }
            rest = chars.as_str();
        }

        Ok(Self {
            source: layout.to_owned(),
            format,
            has_time,
            has_offset,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if self.has_offset {
            return DateTime::parse_from_str(value, &self.format)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc));
        }
        if self.has_time {
            return NaiveDateTime::parse_from_str(value, &self.format)
                .ok()
                .map(|parsed| parsed.and_utc());
        }
        NaiveDate::parse_from_str(value, &self.format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|parsed| parsed.and_utc())
    }
}

/// `.000`, `.999999999` and friends; returns the consumed length.
fn fractional_seconds(rest: &str) -> Option<usize> {
    let digits = rest.strip_prefix('.')?;
    let digit = digits.chars().next().filter(|c| *c == '0' || *c == '9')?;
    let count = digits.chars().take_while(|c| *c == digit).count();
    let followed_by_digit = digits[count..].starts_with(|c: char| c.is_ascii_digit());
    (!followed_by_digit).then_some(1 + count)
}

/// The three layouts of a task, tried in order when reading a timestamp field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateLayouts {
    pub date: TimeLayout,
    pub date_time: TimeLayout,
    pub date_time64: TimeLayout,
}

impl DateLayouts {
    pub fn new(date: &str, date_time: &str, date_time64: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            date: TimeLayout::parse_layout(date)?,
            date_time: TimeLayout::parse_layout(date_time)?,
            date_time64: TimeLayout::parse_layout(date_time64)?,
        })
    }

    /// Tries the datetime, datetime64 and date layouts, then RFC 3339.
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        self.date_time
            .parse(value)
            .or_else(|| self.date_time64.parse(value))
            .or_else(|| self.date.parse(value))
            .or_else(|| {
                DateTime::parse_from_rfc3339(value.trim())
                    .ok()
                    .map(|parsed| parsed.with_timezone(&Utc))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("2006-01-02", "%Y-%m-%d"; "date")]
    #[test_case("2006-01-02 15:04:05", "%Y-%m-%d %H:%M:%S"; "date time")]
    #[test_case("2006-01-02 15:04:05.999999999", "%Y-%m-%d %H:%M:%S%.f"; "nanos")]
    #[test_case("20060102 150405.000", "%Y%m%d %H%M%S%.f"; "compact millis")]
    #[test_case("2006-01-02T15:04:05Z07:00", "%Y-%m-%dT%H:%M:%S%#z"; "rfc3339")]
    #[test_case("02/Jan/2006:15:04:05 -0700", "%d/%b/%Y:%H:%M:%S %z"; "nginx")]
    #[test_case("2006-01-02 %", "%Y-%m-%d %%"; "escaped percent")]
    fn should_translate_layout(layout: &str, expected: &str) {
        assert_eq!(TimeLayout::parse_layout(layout).unwrap().format(), expected);
    }

    #[test]
    fn should_reject_named_time_zones() {
        let result = TimeLayout::parse_layout("2006-01-02 15:04:05 MST");
        assert!(matches!(
            result,
            Err(ConfigError::UnsupportedLayout { token, .. }) if token == "MST"
        ));
    }

    #[test]
    fn should_parse_date_time_as_utc() {
        let layout = TimeLayout::parse_layout("2006-01-02 15:04:05").unwrap();
        let parsed = layout.parse("2024-03-01 10:00:30").unwrap();
        assert_eq!(parsed.timestamp(), 1_709_287_230);
    }

    #[test]
    fn should_parse_date_only_as_midnight() {
        let layout = TimeLayout::parse_layout("20060102").unwrap();
        let parsed = layout.parse("20240301").unwrap();
        assert_eq!(parsed.timestamp(), 1_709_251_200);
    }

    #[test]
    fn should_apply_offset_when_layout_has_one() {
        let layout = TimeLayout::parse_layout("02/Jan/2006:15:04:05 -0700").unwrap();
        let parsed = layout.parse("01/Mar/2024:12:00:30 +0200").unwrap();
        assert_eq!(parsed.timestamp(), 1_709_287_230);
    }

    #[test]
    fn should_fall_back_across_layouts_and_rfc3339() {
        let layouts =
            DateLayouts::new("2006-01-02", "2006-01-02 15:04:05", "2006-01-02 15:04:05.000")
                .unwrap();

        assert_eq!(
            layouts.parse("2024-03-01 10:00:30.250").unwrap().timestamp(),
            1_709_287_230
        );
        assert_eq!(
            layouts.parse("2024-03-01").unwrap().timestamp(),
            1_709_251_200
        );
        assert_eq!(
            layouts.parse("2024-03-01T10:00:30Z").unwrap().timestamp(),
            1_709_287_230
        );
        assert!(layouts.parse("not a time").is_none());
    }
}
