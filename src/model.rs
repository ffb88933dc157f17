use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{GatewaySettings, HubSettings};
use crate::template::sanitize;

/// Maximum number of take records kept in history.
pub const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Play,
    Record,
    Preview,
    Stopped,
}

impl TransportStatus {
    /// Parse the status word a deck reports in its transport info block.
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "play" => Some(Self::Play),
            "record" => Some(Self::Record),
            "preview" => Some(Self::Preview),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Record => "record",
            Self::Preview => "preview",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recorder {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, rename = "ipAddress")]
    pub address: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "first_number")]
    pub shot_number: u32,

    #[serde(default = "first_number")]
    pub take_number: u32,

    #[serde(default = "default_template_id")]
    pub selected_template: String,

    #[serde(default)]
    pub custom_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_show: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_date: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_shot_take: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_custom: Option<bool>,

    #[serde(default, rename = "recordingQuality", skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,

    #[serde(default)]
    pub online: bool,

    /// Milliseconds since the epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<i64>,

    #[serde(
        default,
        deserialize_with = "lenient_transport",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_status: Option<TransportStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timecode: Option<String>,

    #[serde(default, rename = "diskSpaceGB", skip_serializing_if = "Option::is_none")]
    pub disk_space_gb: Option<f64>,

    #[serde(default)]
    pub clips: Vec<Clip>,

    /// Legacy video format label. Kept so older documents round-trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_time_minutes: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

fn first_number() -> u32 {
    1
}

fn default_template_id() -> String {
    TemplateKind::Show.id().to_string()
}

fn lenient_transport<'de, D>(deserializer: D) -> Result<Option<TransportStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let word: Option<String> = Option::deserialize(deserializer)?;
    Ok(word.as_deref().and_then(TransportStatus::parse))
}

impl Recorder {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            enabled: true,
            shot_number: 1,
            take_number: 1,
            selected_template: default_template_id(),
            custom_text: String::new(),
            include_show: None,
            include_date: None,
            include_shot_take: None,
            include_custom: None,
            codec: None,
            online: false,
            last_checked: None,
            transport_status: None,
            timecode: None,
            disk_space_gb: None,
            clips: Vec::new(),
            format: None,
            recording_time_minutes: None,
        }
    }

    /// Name shown to operators; falls back to the id when unnamed.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// Lookup key used on the show-control link.
    pub fn sanitized_name(&self) -> String {
        sanitize(self.display_name())
    }

    pub fn template_kind(&self) -> Option<TemplateKind> {
        TemplateKind::from_id(&self.selected_template)
    }

    pub fn toggles(&self) -> TemplateToggles {
        TemplateToggles {
            include_show: self.include_show,
            include_date: self.include_date,
            include_shot_take: self.include_shot_take,
            include_custom: self.include_custom,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.transport_status == Some(TransportStatus::Record)
    }
}

/// Per-recorder switches for the parts of a generated take name. `None` means included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateToggles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_show: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_date: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_shot_take: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_custom: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Take {
    pub id: String,
    pub name: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorder_id: Option<String>,
    /// Free-form data attached by older releases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub format: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Show,
    Take,
    Custom,
}

impl TemplateKind {
    pub const ALL: [TemplateKind; 3] = [Self::Show, Self::Take, Self::Custom];

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "1" => Some(Self::Show),
            "2" => Some(Self::Take),
            "3" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Show => "1",
            Self::Take => "2",
            Self::Custom => "3",
        }
    }

    pub fn template(&self) -> Template {
        let (name, format, variables): (&str, &str, &[&str]) = match self {
            Self::Show => ("Show", "{showName}_{date}", &["showName", "date"]),
            Self::Take => (
                "Take",
                "{showName}_{date}_S{shotNumber}_{customText}_T{takeNumber}",
                &["showName", "date", "shotNumber", "customText", "takeNumber"],
            ),
            Self::Custom => ("Custom", "{customText}", &["customText"]),
        };
        Template {
            id: self.id().to_string(),
            name: name.to_string(),
            format: format.to_string(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
        }
    }
}

pub fn default_templates() -> Vec<Template> {
    TemplateKind::ALL.iter().map(TemplateKind::template).collect()
}

/// Date pattern used for the `{date}` part of generated names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    #[default]
    #[serde(rename = "YYYYMMDD")]
    YearMonthDay,
    #[serde(rename = "MMDDYYYY")]
    MonthDayYear,
    #[serde(rename = "DDMMYYYY")]
    DayMonthYear,
    #[serde(rename = "YYYY-MM-DD")]
    IsoDate,
    #[serde(rename = "YYYYMMDDHHmm")]
    YearMonthDayHourMinute,
    #[serde(rename = "YYYYMMDD-HHmm")]
    DateDashTime,
    #[serde(rename = "YYYYMMDD_HHmm")]
    DateUnderscoreTime,
    #[serde(rename = "YYYY-MM-DD-HHmm")]
    IsoDateTime,
    #[serde(rename = "HHmmss")]
    TimeOnly,
}

impl DateFormat {
    pub const ALL: [DateFormat; 9] = [
        Self::YearMonthDay,
        Self::MonthDayYear,
        Self::DayMonthYear,
        Self::IsoDate,
        Self::YearMonthDayHourMinute,
        Self::DateDashTime,
        Self::DateUnderscoreTime,
        Self::IsoDateTime,
        Self::TimeOnly,
    ];

    /// Label as stored in the state document.
    pub fn label(&self) -> &'static str {
        match self {
            Self::YearMonthDay => "YYYYMMDD",
            Self::MonthDayYear => "MMDDYYYY",
            Self::DayMonthYear => "DDMMYYYY",
            Self::IsoDate => "YYYY-MM-DD",
            Self::YearMonthDayHourMinute => "YYYYMMDDHHmm",
            Self::DateDashTime => "YYYYMMDD-HHmm",
            Self::DateUnderscoreTime => "YYYYMMDD_HHmm",
            Self::IsoDateTime => "YYYY-MM-DD-HHmm",
            Self::TimeOnly => "HHmmss",
        }
    }

    /// chrono format string
    pub fn pattern(&self) -> &'static str {
        match self {
            Self::YearMonthDay => "%Y%m%d",
            Self::MonthDayYear => "%m%d%Y",
            Self::DayMonthYear => "%d%m%Y",
            Self::IsoDate => "%Y-%m-%d",
            Self::YearMonthDayHourMinute => "%Y%m%d%H%M",
            Self::DateDashTime => "%Y%m%d-%H%M",
            Self::DateUnderscoreTime => "%Y%m%d_%H%M",
            Self::IsoDateTime => "%Y-%m-%d-%H%M",
            Self::TimeOnly => "%H%M%S",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.label() == label)
    }
}

fn lenient_date_format<'de, D>(deserializer: D) -> Result<DateFormat, D::Error>
where
    D: Deserializer<'de>,
{
    let label: Option<String> = Option::deserialize(deserializer)?;
    Ok(label
        .as_deref()
        .and_then(DateFormat::from_label)
        .unwrap_or_default())
}

/// Fleet-wide counters reported to the monitoring hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FleetMetrics {
    pub recorders_total: usize,
    pub recorders_online: usize,
    pub recorders_recording: usize,
    pub total_disk_space_gb: f64,
}

/// The whole show: recorders, takes, templates and link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub recorders: Vec<Recorder>,

    #[serde(default)]
    pub current_takes: BTreeMap<String, String>,

    #[serde(default)]
    pub take_history: Vec<Take>,

    #[serde(default = "default_templates")]
    pub templates: Vec<Template>,

    #[serde(default)]
    pub predefined_takes: Vec<String>,

    #[serde(default)]
    pub show_name: String,

    #[serde(default, deserialize_with = "lenient_date_format")]
    pub date_format: DateFormat,

    #[serde(default, rename = "oscSettings")]
    pub gateway: GatewaySettings,

    #[serde(default, rename = "cmndSettings")]
    pub hub: HubSettings,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            recorders: Vec::new(),
            current_takes: BTreeMap::new(),
            take_history: Vec::new(),
            templates: default_templates(),
            predefined_takes: Vec::new(),
            show_name: String::new(),
            date_format: DateFormat::default(),
            gateway: GatewaySettings::default(),
            hub: HubSettings::default(),
        }
    }
}

impl AppState {
    pub fn recorder(&self, id: &str) -> Option<&Recorder> {
        self.recorders.iter().find(|r| r.id == id)
    }

    pub fn recorder_mut(&mut self, id: &str) -> Option<&mut Recorder> {
        self.recorders.iter_mut().find(|r| r.id == id)
    }

    /// First recorder whose sanitized display name matches the sanitized token.
    pub fn find_by_sanitized(&self, token: &str) -> Option<&Recorder> {
        let wanted = sanitize(token);
        self.recorders.iter().find(|r| r.sanitized_name() == wanted)
    }

    /// Record a take at the front of history, dropping the oldest past the limit.
    pub fn push_history(&mut self, take: Take) {
        self.take_history.insert(0, take);
        self.take_history.truncate(HISTORY_LIMIT);
    }

    pub fn metrics(&self) -> FleetMetrics {
        let total: f64 = self.recorders.iter().filter_map(|r| r.disk_space_gb).sum();
        FleetMetrics {
            recorders_total: self.recorders.len(),
            recorders_online: self.recorders.iter().filter(|r| r.online).count(),
            recorders_recording: self.recorders.iter().filter(|r| r.is_recording()).count(),
            total_disk_space_gb: (total * 100.0).round() / 100.0,
        }
    }
}
