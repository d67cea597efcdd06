//! InfluxDB sinks (1.x and 2.x) writing line protocol over HTTP.

use super::{Sink, SinkError, SinkFuture, http_client};
use crate::config::{InfluxDb2Config, InfluxDbConfig};
use crate::reading::Reading;
use reqwest::Url;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use tracing::{Instrument, debug, debug_span};

/// Measurement name used for every point.
pub const MEASUREMENT: &str = "tilt";

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
        }
    }
}

/// Data point in InfluxDB line protocol
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
    pub timestamp: Option<SystemTime>,
}

/// Escape commas, equals signs and spaces in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", key, value)?;
    }
    Ok(())
}

fn fmt_timestamp(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    if let Some(nanos) = data_point
        .timestamp
        .and_then(|time| time.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
    {
        write!(fmt, " {}", nanos)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape_tag(&self.measurement))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)?;
        fmt_timestamp(self, fmt)
    }
}

/// Formats readings as InfluxDB line protocol.
#[derive(Debug, Clone)]
pub struct LineProtocolFormatter {
    measurement_name: String,
}

impl LineProtocolFormatter {
    pub fn new(measurement_name: impl Into<String>) -> Self {
        Self {
            measurement_name: measurement_name.into(),
        }
    }

    fn tag_set(reading: &Reading) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("color".to_string(), reading.color.clone());
        tags.insert("name".to_string(), reading.name.clone());
        tags
    }

    fn field_set(reading: &Reading) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "temp_fahrenheit".into(),
            FieldValue::Float(reading.temp_fahrenheit),
        );
        fields.insert(
            "temp_celsius".into(),
            FieldValue::Integer(i64::from(reading.temp_celsius)),
        );
        fields.insert("gravity".into(), FieldValue::Float(reading.gravity));
        fields.insert(
            "alcohol_by_volume".into(),
            FieldValue::Float(reading.alcohol_by_volume),
        );
        fields.insert(
            "apparent_attenuation".into(),
            FieldValue::Float(reading.apparent_attenuation),
        );
        fields
    }

    pub fn to_data_point(&self, reading: &Reading) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: Self::tag_set(reading),
            field_set: Self::field_set(reading),
            timestamp: Some(reading.timestamp),
        }
    }

    pub fn format(&self, reading: &Reading) -> String {
        self.to_data_point(reading).to_string()
    }
}

impl Default for LineProtocolFormatter {
    fn default() -> Self {
        Self::new(MEASUREMENT)
    }
}

#[derive(Debug, Clone)]
enum Auth {
    None,
    Basic { username: String, password: Option<String> },
    Token(String),
}

/// Batches points and writes them to an InfluxDB server.
///
/// Points are only sent once `batch_size` of them have accumulated. A partial
/// batch still buffered at shutdown is discarded, so up to `batch_size - 1`
/// points can be lost when the process stops.
pub struct InfluxDbSink {
    name: String,
    /// Write endpoint, `None` when the section is not configured
    endpoint: Option<Url>,
    auth: Auth,
    client: reqwest::Client,
    formatter: LineProtocolFormatter,
    batch: Vec<String>,
    batch_size: usize,
}

fn write_endpoint(base: &str, path: &str, params: &[(&str, &str)]) -> Result<Url, SinkError> {
    let mut url = Url::parse(&format!("{}/{}", base.trim_end_matches('/'), path))
        .map_err(|e| SinkError::Setup(format!("invalid InfluxDB url '{base}': {e}")))?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url)
}

impl InfluxDbSink {
    /// InfluxDB 1.x, `POST /write?db=...`.
    pub fn v1(config: &InfluxDbConfig) -> Result<Self, SinkError> {
        let endpoint = config
            .url
            .as_deref()
            .map(|base| write_endpoint(base, "write", &[("db", config.database.as_str())]))
            .transpose()?;
        let auth = match &config.username {
            Some(username) => Auth::Basic {
                username: username.clone(),
                password: config.password.clone(),
            },
            None => Auth::None,
        };
        Ok(Self {
            name: format!("InfluxDb ({})", config.url.as_deref().unwrap_or_default()),
            endpoint,
            auth,
            client: http_client(config.timeout)?,
            formatter: LineProtocolFormatter::default(),
            batch: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size.max(1),
        })
    }

    /// InfluxDB 2.x, `POST /api/v2/write?org=...&bucket=...`.
    pub fn v2(config: &InfluxDb2Config) -> Result<Self, SinkError> {
        let endpoint = config
            .url
            .as_deref()
            .map(|base| {
                write_endpoint(
                    base,
                    "api/v2/write",
                    &[("org", config.org.as_str()), ("bucket", config.bucket.as_str())],
                )
            })
            .transpose()?;
        let auth = match &config.token {
            Some(token) => Auth::Token(token.clone()),
            None => Auth::None,
        };
        Ok(Self {
            name: format!("InfluxDb2 ({})", config.url.as_deref().unwrap_or_default()),
            endpoint,
            auth,
            client: http_client(config.timeout)?,
            formatter: LineProtocolFormatter::default(),
            batch: Vec::with_capacity(config.batch_size),
            batch_size: config.batch_size.max(1),
        })
    }

    /// Add a point; returns the full batch body once `batch_size` is reached.
    fn push(&mut self, reading: &Reading) -> Option<String> {
        self.batch.push(self.formatter.format(reading));
        if self.batch.len() < self.batch_size {
            return None;
        }
        let body = self.batch.join("\n");
        self.batch.clear();
        Some(body)
    }

    async fn send(&self, body: String) -> Result<(), SinkError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(());
        };
        let request = self.client.post(endpoint.clone()).body(body);
        let request = match &self.auth {
            Auth::None => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Auth::Token(token) => request.header("Authorization", format!("Token {token}")),
        };
        request.send().await?.error_for_status()?;
        Ok(())
    }
}

impl Sink for InfluxDbSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    fn write<'a>(&'a mut self, reading: &'a Reading) -> SinkFuture<'a, ()> {
        let span = debug_span!("influxdb_write", sink = %self.name, color = %reading.color);
        Box::pin(
            async move {
                match self.push(reading) {
                    Some(body) => self.send(body).await,
                    None => {
                        debug!(pending = self.batch.len(), "Point batched");
                        Ok(())
                    }
                }
            }
            .instrument(span),
        )
    }
}
