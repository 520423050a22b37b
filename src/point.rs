//! In-memory representation of a measurement and its line-protocol form.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::options::Precision;

/// A single tag, an ordered (key, value) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// A single field, an ordered (key, typed value) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Field key.
    pub key: String,
    /// Normalized field value.
    pub value: FieldValue,
}

/// Field value after normalization.
///
/// Narrower integer and float types widen through the `From` conversions;
/// timestamps and durations are stored as their string forms (RFC3339Nano and
/// Go short duration syntax respectively), which is how the server expects
/// them inside string fields.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Boolean, serialized bare.
    Bool(bool),
    /// Signed 64-bit integer, serialized with an `i` suffix.
    Long(i64),
    /// Unsigned 64-bit integer, serialized with a `u` suffix.
    UnsignedLong(u64),
    /// 64-bit float, serialized bare.
    Double(f64),
    /// String, serialized quoted with `\` and `"` escaped.
    String(String),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

macro_rules! field_value_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::Long(v as i64)
            }
        }
    )*};
}

macro_rules! field_value_from_uint {
    ($($t:ty),*) => {$(
        impl From<$t> for FieldValue {
            fn from(v: $t) -> Self {
                FieldValue::UnsignedLong(v as u64)
            }
        }
    )*};
}

field_value_from_int!(i8, i16, i32, i64);
field_value_from_uint!(u8, u16, u32, u64);

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Double(f64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(v: &[u8]) -> Self {
        FieldValue::String(String::from_utf8_lossy(v).into_owned())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl From<chrono::Duration> for FieldValue {
    fn from(v: chrono::Duration) -> Self {
        FieldValue::String(format_duration(v))
    }
}

impl From<std::time::Duration> for FieldValue {
    fn from(v: std::time::Duration) -> Self {
        let d = chrono::Duration::from_std(v).unwrap_or(chrono::Duration::MAX);
        d.into()
    }
}

/// A measurement with ordered tags and fields.
///
/// Tags and fields keep insertion order until [`sort_tags`](Point::sort_tags)
/// or [`sort_fields`](Point::sort_fields) is called; serialization output is
/// stable only after sorting.
///
/// # Example
///
/// ```ignore
/// use influxdb2_client::{Point, Precision};
///
/// let mut p = Point::new("cpu");
/// p.add_tag("host", "server-1").add_field("usage", 80.5);
/// let line = p.to_line_protocol(Precision::Ns);
/// assert_eq!(line, "cpu,host=server-1 usage=80.5\n");
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<Tag>,
    fields: Vec<Field>,
    timestamp: Option<DateTime<Utc>>,
}

impl Point {
    /// Creates an empty point with just a measurement name.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp: None,
        }
    }

    /// Creates a point from measurement name, tags, fields and an optional
    /// timestamp. Tags and fields are sorted by key.
    pub fn from_parts<'a, T, F>(
        measurement: impl Into<String>,
        tags: T,
        fields: F,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self
    where
        T: IntoIterator<Item = (&'a str, &'a str)>,
        F: IntoIterator<Item = (&'a str, FieldValue)>,
    {
        let mut point = Self::new(measurement);
        for (k, v) in tags {
            point.add_tag(k, v);
        }
        for (k, v) in fields {
            point.add_field(k, v);
        }
        point.timestamp = timestamp;
        point.sort_tags();
        point.sort_fields();
        point
    }

    /// Measurement name.
    pub fn name(&self) -> &str {
        &self.measurement
    }

    /// Tags in their current order.
    pub fn tag_list(&self) -> &[Tag] {
        &self.tags
    }

    /// Fields in their current order.
    pub fn field_list(&self) -> &[Field] {
        &self.fields
    }

    /// Timestamp of the point, `None` when the server assigns one.
    pub fn time(&self) -> Option<&DateTime<Utc>> {
        self.timestamp.as_ref()
    }

    /// Sets the timestamp.
    pub fn set_time(&mut self, timestamp: DateTime<Utc>) -> &mut Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Adds a tag, replacing the value of an existing key.
    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if let Some(tag) = self.tags.iter_mut().find(|t| t.key == key) {
            tag.value = value;
        } else {
            self.tags.push(Tag { key, value });
        }
        self
    }

    /// Adds a field, replacing the value of an existing key.
    pub fn add_field(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        if let Some(field) = self.fields.iter_mut().find(|f| f.key == key) {
            field.value = value;
        } else {
            self.fields.push(Field { key, value });
        }
        self
    }

    /// Orders tags alphanumerically by key.
    pub fn sort_tags(&mut self) -> &mut Self {
        self.tags.sort_by(|a, b| a.key.cmp(&b.key));
        self
    }

    /// Orders fields alphanumerically by key.
    pub fn sort_fields(&mut self) -> &mut Self {
        self.fields.sort_by(|a, b| a.key.cmp(&b.key));
        self
    }

    /// Serializes the point to a line-protocol string, converting the
    /// timestamp according to `precision`. The line ends with `\n`.
    pub fn to_line_protocol(&self, precision: Precision) -> String {
        let mut out = String::with_capacity(1024);
        self.write_line_protocol(&mut out, precision);
        out
    }

    /// Serializes the point into an existing buffer, avoiding per-point
    /// allocations when encoding a batch.
    pub fn write_line_protocol(&self, out: &mut String, precision: Precision) {
        escape_key(out, &self.measurement);
        for tag in &self.tags {
            out.push(',');
            escape_key(out, &tag.key);
            out.push('=');
            escape_key(out, &tag.value);
        }
        out.push(' ');
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            escape_key(out, &field.key);
            out.push('=');
            match &field.value {
                FieldValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
                FieldValue::Long(v) => {
                    out.push_str(&v.to_string());
                    out.push('i');
                }
                FieldValue::UnsignedLong(v) => {
                    out.push_str(&v.to_string());
                    out.push('u');
                }
                FieldValue::Double(v) => out.push_str(&v.to_string()),
                FieldValue::String(s) => {
                    out.push('"');
                    escape_string_value(out, s);
                    out.push('"');
                }
            }
        }
        if let Some(timestamp) = &self.timestamp {
            out.push(' ');
            let scaled = match precision {
                // Timestamps beyond ±~262 years around 1970 lose
                // sub-microsecond precision.
                Precision::Ns => timestamp
                    .timestamp_nanos_opt()
                    .unwrap_or_else(|| timestamp.timestamp_micros().saturating_mul(1000)),
                Precision::Us => timestamp.timestamp_micros(),
                Precision::Ms => timestamp.timestamp_millis(),
                Precision::S => timestamp.timestamp(),
            };
            out.push_str(&scaled.to_string());
        }
        out.push('\n');
    }
}

/// Escapes space, comma and equals sign in measurements, tag keys, tag values
/// and field keys.
fn escape_key(out: &mut String, key: &str) {
    for c in key.chars() {
        if matches!(c, ' ' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Escapes backslash and double quote in string field values.
fn escape_string_value(out: &mut String, value: &str) {
    for c in value.chars() {
        if matches!(c, '\\' | '"') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Formats a duration in the Go short syntax, e.g. "4h24m3s", "1.5s",
/// "500ms". The zero duration is "0s".
fn format_duration(d: chrono::Duration) -> String {
    let Some(nanos) = d.num_nanoseconds() else {
        return format_duration_nanos(i64::MAX.unsigned_abs(), false);
    };
    if nanos == 0 {
        return "0s".to_string();
    }
    format_duration_nanos(nanos.unsigned_abs(), nanos < 0)
}

fn format_duration_nanos(n: u64, negative: bool) -> String {
    let body = if n < 1_000 {
        format!("{}ns", n)
    } else if n < 1_000_000 {
        format!("{}µs", with_fraction(n / 1_000, n % 1_000, 3))
    } else if n < 1_000_000_000 {
        format!("{}ms", with_fraction(n / 1_000_000, n % 1_000_000, 6))
    } else {
        let secs = n / 1_000_000_000;
        let seconds = with_fraction(secs % 60, n % 1_000_000_000, 9);
        let minutes = secs / 60 % 60;
        let hours = secs / 3600;
        if hours > 0 {
            format!("{}h{}m{}s", hours, minutes, seconds)
        } else if minutes > 0 {
            format!("{}m{}s", minutes, seconds)
        } else {
            format!("{}s", seconds)
        }
    };
    if negative {
        format!("-{}", body)
    } else {
        body
    }
}

/// "1" for (1, 0), "1.5" for (1, 500...) with trailing zeros trimmed.
fn with_fraction(whole: u64, frac: u64, digits: usize) -> String {
    if frac == 0 {
        return whole.to_string();
    }
    let mut f = format!("{:0width$}", frac, width = digits);
    while f.ends_with('0') {
        f.pop();
    }
    format!("{}.{}", whole, f)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn full_point() -> Point {
        let mut p = Point::new("test");
        p.add_tag("id", "10ad=");
        p.add_tag("ven=dor", "AWS");
        p.add_tag(r#"host"name"#, "host_a");
        // re-setting an existing tag replaces its value
        p.add_tag(r#"host"name"#, r#"ho\st "a""#);
        p.add_tag(r#"x\" x"#, "a b");
        p.sort_tags();

        p.add_field("float64", 80.1234567);
        p.add_field("float32", 80.0f32);
        p.add_field("int8", -34i8);
        p.add_field("int16", -3456i16);
        p.add_field("int32", -34567i32);
        p.add_field("int64", -1234567890i64);
        p.add_field("uint8", 34u8);
        p.add_field("uint16", 3456u16);
        p.add_field("uint32", 34578u32);
        p.add_field("uint 64", 0u64);
        // re-setting an existing field replaces its value
        p.add_field("uint 64", 41234567890u64);
        p.add_field(r"bo\ol", false);
        p.add_field(r#""string""#, r#"six, "seven", eight"#);
        p.add_field("stri=ng", r"six=seven\, eight");
        p.add_field("time", Utc.with_ymd_and_hms(2020, 3, 20, 10, 30, 23).unwrap()
            + chrono::Duration::nanoseconds(123456789));
        p.add_field(
            "duration",
            chrono::Duration::hours(4) + chrono::Duration::minutes(24) + chrono::Duration::seconds(3),
        );
        p.sort_fields();

        p.set_time(Utc.timestamp_opt(60, 70).unwrap());
        p
    }

    #[test]
    fn test_full_point_serialization() {
        let p = full_point();
        assert_eq!(p.name(), "test");
        assert_eq!(p.tag_list().len(), 4);
        assert_eq!(p.field_list().len(), 15);

        let line = p.to_line_protocol(Precision::Ns);
        assert!(line.ends_with('\n'));
        let line = &line[..line.len() - 1];
        assert_eq!(
            line,
            r#"test,host"name=ho\st\ "a",id=10ad\=,ven\=dor=AWS,x\"\ x=a\ b "string"="six, \"seven\", eight",bo\ol=false,duration="4h24m3s",float32=80,float64=80.1234567,int16=-3456i,int32=-34567i,int64=-1234567890i,int8=-34i,stri\=ng="six=seven\\, eight",time="2020-03-20T10:30:23.123456789Z",uint\ 64=41234567890u,uint16=3456u,uint32=34578u,uint8=34u 60000000070"#
        );
    }

    #[test]
    fn test_precision_scaling() {
        let mut p = Point::new("test");
        p.add_tag("id", "10");
        p.add_field("float64", 80.1234567);

        p.set_time(Utc.timestamp_opt(60, 89).unwrap());
        assert_eq!(
            p.to_line_protocol(Precision::Ns),
            "test,id=10 float64=80.1234567 60000000089\n"
        );

        p.set_time(Utc.timestamp_opt(60, 56789).unwrap());
        assert_eq!(
            p.to_line_protocol(Precision::Us),
            "test,id=10 float64=80.1234567 60000056\n"
        );

        p.set_time(Utc.timestamp_opt(60, 123456789).unwrap());
        assert_eq!(
            p.to_line_protocol(Precision::Ms),
            "test,id=10 float64=80.1234567 60123\n"
        );

        p.set_time(Utc.timestamp_opt(60, 123456789).unwrap());
        assert_eq!(
            p.to_line_protocol(Precision::S),
            "test,id=10 float64=80.1234567 60\n"
        );
    }

    #[test]
    fn test_no_timestamp_is_omitted() {
        let mut p = Point::new("m");
        p.add_field("v", 1i64);
        assert_eq!(p.to_line_protocol(Precision::Ns), "m v=1i\n");
    }

    #[test]
    fn test_from_parts_sorts_keys() {
        let p = Point::from_parts(
            "test",
            [("b", "2"), ("a", "1")],
            [("y", FieldValue::from(2i64)), ("x", FieldValue::from(1i64))],
            None,
        );
        assert_eq!(p.to_line_protocol(Precision::Ns), "test,a=1,b=2 x=1i,y=2i\n");
    }

    #[test]
    fn test_single_unescaped_space_separators() {
        let mut p = Point::new("test measurement");
        p.add_tag("tag key", "tag value");
        p.add_field("field key", 1i64);
        p.set_time(Utc.timestamp_opt(60, 70).unwrap());

        let line = p.to_line_protocol(Precision::Ns);
        assert_eq!(
            line,
            "test\\ measurement,tag\\ key=tag\\ value field\\ key=1i 60000000070\n"
        );

        let bytes = line.trim_end().as_bytes();
        let separators = bytes
            .iter()
            .enumerate()
            .filter(|&(i, &b)| b == b' ' && (i == 0 || bytes[i - 1] != b'\\'))
            .count();
        assert_eq!(separators, 2);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::zero()), "0s");
        assert_eq!(format_duration(chrono::Duration::nanoseconds(120)), "120ns");
        assert_eq!(format_duration(chrono::Duration::nanoseconds(1500)), "1.5µs");
        assert_eq!(format_duration(chrono::Duration::microseconds(500)), "500µs");
        assert_eq!(format_duration(chrono::Duration::milliseconds(500)), "500ms");
        assert_eq!(format_duration(chrono::Duration::milliseconds(1500)), "1.5s");
        assert_eq!(format_duration(chrono::Duration::seconds(90)), "1m30s");
        assert_eq!(
            format_duration(chrono::Duration::hours(4) + chrono::Duration::minutes(24) + chrono::Duration::seconds(3)),
            "4h24m3s"
        );
        assert_eq!(format_duration(chrono::Duration::seconds(-90)), "-1m30s");
        assert_eq!(format_duration(chrono::Duration::hours(26)), "26h0m0s");
    }

    #[test]
    fn test_field_value_widening() {
        assert_eq!(FieldValue::from(-34i8), FieldValue::Long(-34));
        assert_eq!(FieldValue::from(3456u16), FieldValue::UnsignedLong(3456));
        assert_eq!(FieldValue::from(80.0f32), FieldValue::Double(80.0));
        assert_eq!(
            FieldValue::from(&b"bytes"[..]),
            FieldValue::String("bytes".to_string())
        );
        assert_eq!(
            FieldValue::from(std::time::Duration::from_millis(1500)),
            FieldValue::String("1.5s".to_string())
        );
    }
}
