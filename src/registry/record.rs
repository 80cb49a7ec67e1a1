use std::{fmt, path::PathBuf, str::FromStr, sync::OnceLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NodeError, Result};

/// Lifecycle backend that owns a node's runtime. Fixed at install time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Container,
    Process,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Container => "container",
            Method::Process => "process",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "container" | "docker" => Ok(Method::Container),
            "process" | "normal" => Ok(Method::Process),
            other => Err(NodeError::InvalidMethod(other.to_string())),
        }
    }
}

/// The two ports a node occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub service: u16,
    pub xray_api: u16,
}

impl PortPair {
    pub fn new(service: u16, xray_api: u16) -> Self {
        Self { service, xray_api }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.service == port || self.xray_api == port
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.xray_api)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub name: String,
    pub ports: PortPair,
    pub method: Method,
    pub install_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cert_file: PathBuf,
    pub inbounds: Vec<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(
        name: &str,
        ports: PortPair,
        method: Method,
        install_dir: PathBuf,
        data_dir: PathBuf,
        cert_file: PathBuf,
        inbounds: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            ports,
            method,
            install_dir,
            data_dir,
            cert_file,
            inbounds,
            status: String::from("installed"),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Check a node name against `^[A-Za-z][A-Za-z0-9_-]{1,49}$`.
pub fn validate_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9_-]{1,49}$").expect("node name pattern is valid")
    });

    if re.is_match(name) {
        Ok(())
    } else {
        Err(NodeError::InvalidName(name.to_string()))
    }
}

/// Parse a comma separated inbound list into an ordered, duplicate-free set.
pub fn parse_inbounds(raw: &str) -> Vec<String> {
    let mut inbounds: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !inbounds.iter().any(|t| t == tag) {
            inbounds.push(tag.to_string());
        }
    }
    inbounds
}

/// Fields that may be changed on an existing record.
///
/// `method` and `name` are deliberately absent: switching backends in place
/// is not supported and the name is the record's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeField {
    ServicePort,
    XrayApiPort,
    InstallDir,
    DataDir,
    CertFile,
    Status,
    Inbounds,
}

impl NodeField {
    pub fn column(&self) -> &'static str {
        match self {
            NodeField::ServicePort => "service_port",
            NodeField::XrayApiPort => "xray_api_port",
            NodeField::InstallDir => "install_dir",
            NodeField::DataDir => "data_dir",
            NodeField::CertFile => "cert_file",
            NodeField::Status => "status",
            NodeField::Inbounds => "inbounds",
        }
    }
}

impl FromStr for NodeField {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "service_port" => Ok(NodeField::ServicePort),
            "xray_api_port" => Ok(NodeField::XrayApiPort),
            "install_dir" => Ok(NodeField::InstallDir),
            "data_dir" => Ok(NodeField::DataDir),
            "cert_file" => Ok(NodeField::CertFile),
            "status" => Ok(NodeField::Status),
            "inbounds" => Ok(NodeField::Inbounds),
            other => Err(NodeError::InvalidField(other.to_string())),
        }
    }
}

/// A typed value for an update. Each variant fixes the field it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    ServicePort(u16),
    XrayApiPort(u16),
    InstallDir(PathBuf),
    DataDir(PathBuf),
    CertFile(PathBuf),
    Status(String),
    Inbounds(Vec<String>),
}

impl FieldUpdate {
    pub fn field(&self) -> NodeField {
        match self {
            FieldUpdate::ServicePort(_) => NodeField::ServicePort,
            FieldUpdate::XrayApiPort(_) => NodeField::XrayApiPort,
            FieldUpdate::InstallDir(_) => NodeField::InstallDir,
            FieldUpdate::DataDir(_) => NodeField::DataDir,
            FieldUpdate::CertFile(_) => NodeField::CertFile,
            FieldUpdate::Status(_) => NodeField::Status,
            FieldUpdate::Inbounds(_) => NodeField::Inbounds,
        }
    }

    /// Build an update from a field name and its textual value.
    pub fn parse(field: &str, value: &str) -> Result<Self> {
        let field: NodeField = field.parse()?;
        let port = |v: &str| {
            v.parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| NodeError::InvalidInput(format!("'{}' is not a valid port", v)))
        };

        Ok(match field {
            NodeField::ServicePort => FieldUpdate::ServicePort(port(value)?),
            NodeField::XrayApiPort => FieldUpdate::XrayApiPort(port(value)?),
            NodeField::InstallDir => FieldUpdate::InstallDir(PathBuf::from(value)),
            NodeField::DataDir => FieldUpdate::DataDir(PathBuf::from(value)),
            NodeField::CertFile => FieldUpdate::CertFile(PathBuf::from(value)),
            NodeField::Status => FieldUpdate::Status(value.to_string()),
            NodeField::Inbounds => FieldUpdate::Inbounds(parse_inbounds(value)),
        })
    }
}

/// A process-wide key/value setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alpha").is_ok());
        assert!(validate_name("a1").is_ok());
        assert!(validate_name("node_01-eu").is_ok());
        assert!(validate_name(&format!("a{}", "b".repeat(49))).is_ok());

        assert!(validate_name("a").is_err());
        assert!(validate_name("1node").is_err());
        assert!(validate_name("-node").is_err());
        assert!(validate_name("no de").is_err());
        assert!(validate_name("node.1").is_err());
        assert!(validate_name(&format!("a{}", "b".repeat(50))).is_err());
    }

    #[test]
    fn test_parse_inbounds() {
        assert_eq!(
            parse_inbounds(" VLESS TCP, vmess ,,VLESS TCP,Trojan"),
            vec!["VLESS TCP", "vmess", "Trojan"]
        );
        assert!(parse_inbounds("").is_empty());
        assert_eq!(parse_inbounds("a,A"), vec!["a", "A"]);
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("container".parse::<Method>().unwrap(), Method::Container);
        assert_eq!("docker".parse::<Method>().unwrap(), Method::Container);
        assert_eq!("process".parse::<Method>().unwrap(), Method::Process);
        assert!(matches!(
            "vm".parse::<Method>(),
            Err(NodeError::InvalidMethod(_))
        ));
    }

    #[test]
    fn test_field_whitelist() {
        assert!(matches!(
            "method".parse::<NodeField>(),
            Err(NodeError::InvalidField(f)) if f == "method"
        ));
        assert!("name".parse::<NodeField>().is_err());
        assert!("id".parse::<NodeField>().is_err());
        assert!("service_port; DROP TABLE nodes".parse::<NodeField>().is_err());
        assert_eq!(
            FieldUpdate::parse("service_port", "62070").unwrap(),
            FieldUpdate::ServicePort(62070)
        );
        assert!(FieldUpdate::parse("xray_api_port", "0").is_err());
        assert!(FieldUpdate::parse("xray_api_port", "70000").is_err());
    }
}
