pub mod ini;

pub use ini::{IniDocument, Section};

use crate::error::{PtError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Section holding the executable, state directory and forward target
pub const COMMON_SECTION: &str = "common";

/// Section mapping transport names to bind addresses
pub const TRANSPORTS_SECTION: &str = "transports";

/// Suffix of the per-transport option sections (`<name>-options`)
pub const OPTIONS_SUFFIX: &str = "-options";

/// One transport method the PT should expose
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportLaunchSpec {
    /// Transport method name, unique within a configuration
    pub name: String,

    /// Address the PT listens on for obfuscated client connections
    pub bind_address: String,

    /// Options handed to the PT verbatim
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl TransportLaunchSpec {
    pub fn new(name: impl Into<String>, bind_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_address: bind_address.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// Everything needed to launch the PT as a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLaunchSpec {
    /// Path to the PT executable
    pub executable: PathBuf,

    /// Extra command-line arguments that followed the executable in `exec`
    #[serde(default)]
    pub executable_args: Vec<String>,

    /// Directory where the PT keeps persistent state
    pub state_directory: PathBuf,

    /// Local endpoint that receives the decoded traffic
    pub forward_target: String,

    /// Requested transports, in configuration order
    pub transports: Vec<TransportLaunchSpec>,
}

impl ServerLaunchSpec {
    /// Load and validate a launch spec from a configuration file
    ///
    /// Files ending in `.toml` are read as TOML; anything else uses the
    /// section/key/value text format. Environment references in `exec` and
    /// `statedir` are expanded before validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            PtError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut spec = match extension {
            "toml" => Self::from_toml_str(&contents)?,
            _ => Self::from_ini_str(&contents)?,
        };

        spec.expand_env_vars();
        spec.validate()?;

        Ok(spec)
    }

    /// Derive a launch spec from section/key/value text, without validation
    pub fn from_ini_str(contents: &str) -> Result<Self> {
        let doc = IniDocument::parse(contents)?;
        Self::from_document(&doc)
    }

    /// Derive a launch spec from TOML text, without validation
    ///
    /// Every top-level key must be a table. Scalars are converted to strings;
    /// arrays and nested tables are rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let table: toml::Table = contents
            .parse()
            .map_err(|e| PtError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        let mut doc = IniDocument::default();
        for (name, value) in table {
            let toml::Value::Table(entries) = value else {
                return Err(PtError::InvalidConfig(format!(
                    "Top-level key '{}' must be a table",
                    name
                )));
            };

            let mut section = Section::new(name.clone());
            for (key, value) in entries {
                let value = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    toml::Value::Datetime(d) => d.to_string(),
                    toml::Value::Array(_) | toml::Value::Table(_) => {
                        return Err(PtError::InvalidConfig(format!(
                            "Value of {}.{} must be a string or scalar",
                            name, key
                        )))
                    }
                };
                section.insert(key, value)?;
            }
            doc.push_section(section)?;
        }

        Self::from_document(&doc)
    }

    /// Build the launch spec from a parsed document
    pub fn from_document(doc: &IniDocument) -> Result<Self> {
        let common = doc
            .section(COMMON_SECTION)
            .ok_or_else(|| PtError::MissingConfigSection(COMMON_SECTION.to_string()))?;

        let exec = required(common, "exec")?;
        let state_directory = required(common, "statedir")?;
        let forward_target = required(common, "forward")?;

        let mut command = split_command(exec)?.into_iter();
        let executable = command.next().map(PathBuf::from).unwrap_or_default();
        let executable_args = command.collect();

        let transports = doc
            .section(TRANSPORTS_SECTION)
            .ok_or_else(|| PtError::MissingConfigSection(TRANSPORTS_SECTION.to_string()))?
            .entries()
            .map(|(name, bind_address)| {
                let options = doc
                    .section(&format!("{}{}", name, OPTIONS_SUFFIX))
                    .map(|section| {
                        section
                            .entries()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();

                TransportLaunchSpec {
                    name: name.to_string(),
                    bind_address: bind_address.to_string(),
                    options,
                }
            })
            .collect();

        Ok(Self {
            executable,
            executable_args,
            state_directory: PathBuf::from(state_directory),
            forward_target: forward_target.to_string(),
            transports,
        })
    }

    /// Validate the launch spec
    ///
    /// A spec without transports is rejected here, so nothing is ever started
    /// for it.
    pub fn validate(&self) -> Result<()> {
        if self.executable.as_os_str().is_empty() {
            return Err(PtError::ConfigValidationError(
                "exec must name the PT executable".to_string(),
            ));
        }

        if self.state_directory.as_os_str().is_empty() {
            return Err(PtError::ConfigValidationError(
                "statedir must not be empty".to_string(),
            ));
        }

        if self.forward_target.trim().is_empty() {
            return Err(PtError::ConfigValidationError(
                "forward must not be empty".to_string(),
            ));
        }

        if self.transports.is_empty() {
            return Err(PtError::ConfigValidationError(format!(
                "no transports configured in [{}]",
                TRANSPORTS_SECTION
            )));
        }

        let mut seen = HashSet::new();
        for transport in &self.transports {
            if transport.name.is_empty() {
                return Err(PtError::ConfigValidationError(
                    "transport name must not be empty".to_string(),
                ));
            }

            if transport
                .name
                .chars()
                .any(|c| c == ',' || c.is_whitespace())
            {
                return Err(PtError::ConfigValidationError(format!(
                    "transport name '{}' must not contain ',' or whitespace",
                    transport.name
                )));
            }

            if transport.bind_address.trim().is_empty() {
                return Err(PtError::ConfigValidationError(format!(
                    "transport '{}' has an empty bind address",
                    transport.name
                )));
            }

            if !seen.insert(transport.name.as_str()) {
                return Err(PtError::DuplicateOption {
                    section: TRANSPORTS_SECTION.to_string(),
                    key: transport.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Find a requested transport by name
    pub fn transport(&self, name: &str) -> Option<&TransportLaunchSpec> {
        self.transports.iter().find(|t| t.name == name)
    }

    pub fn transport_names(&self) -> impl Iterator<Item = &str> {
        self.transports.iter().map(|t| t.name.as_str())
    }

    /// Expand environment variables in the executable, its arguments and the
    /// state directory
    fn expand_env_vars(&mut self) {
        self.executable = expand_env_in_path(&self.executable);
        self.executable_args = self
            .executable_args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();
        self.state_directory = expand_env_in_path(&self.state_directory);
    }
}

/// Fetch a required, non-blank key
fn required<'a>(section: &'a Section, key: &str) -> Result<&'a str> {
    match section.get(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PtError::MissingConfigField {
            section: section.name().to_string(),
            key: key.to_string(),
        }),
    }
}

/// Split a command line into words using shell-style quoting
///
/// Supports single quotes, double quotes and backslash escapes. No variable
/// or glob expansion happens here.
pub fn split_command(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some('\'') => {
                if c == '\'' {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            Some(_) => match c {
                '"' => quote = None,
                '\\' => match chars.next() {
                    Some(next @ ('"' | '\\' | '$' | '`')) => current.push(next),
                    Some(next) => {
                        current.push('\\');
                        current.push(next);
                    }
                    None => break,
                },
                _ => current.push(c),
            },
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_word = true;
                }
                '\\' => match chars.next() {
                    Some(next) => {
                        current.push(next);
                        in_word = true;
                    }
                    None => {
                        return Err(PtError::ConfigValidationError(format!(
                            "exec ends with a dangling backslash: {}",
                            line
                        )))
                    }
                },
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                _ => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err(PtError::ConfigValidationError(format!(
            "exec has an unterminated quote: {}",
            line
        )));
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

/// Expand `$VAR` and `${VAR}` references; unknown variables are left as written
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        let (name, consumed) = match after.strip_prefix('{') {
            Some(inner) => match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };

        let value = if name.is_empty() {
            None
        } else {
            std::env::var(name).ok()
        };

        match value {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                result.push_str(&after[..consumed]);
            }
        }

        rest = &after[consumed..];
    }

    result.push_str(rest);
    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const BASIC: &str = r#"
[common]
exec = /usr/bin/obfs4proxy
statedir = /var/lib/pt
forward = 127.0.0.1:9001

[transports]
obfs4 = 127.0.0.1:1234
"#;

    #[test]
    fn test_example_with_options() {
        let text = format!("{}\n[obfs4-options]\ncert = abc\n", BASIC);
        let spec = ServerLaunchSpec::from_ini_str(&text).unwrap();

        assert_eq!(spec.transports.len(), 1);
        assert_eq!(
            spec.transports[0],
            TransportLaunchSpec::new("obfs4", "127.0.0.1:1234").with_option("cert", "abc")
        );
    }

    #[test]
    fn test_missing_options_section_is_empty() {
        let spec = ServerLaunchSpec::from_ini_str(BASIC).unwrap();
        assert!(spec.transports[0].options.is_empty());
        assert_eq!(spec.executable, PathBuf::from("/usr/bin/obfs4proxy"));
        assert_eq!(spec.state_directory, PathBuf::from("/var/lib/pt"));
        assert_eq!(spec.forward_target, "127.0.0.1:9001");
    }

    #[test]
    fn test_one_transport_per_entry_in_order() {
        let text = r#"
[common]
exec = /bin/pt
statedir = /tmp/state
forward = 127.0.0.1:9001

[transports]
obfs4 = 0.0.0.0:443
meek_lite = 0.0.0.0:8443
scramblesuit = 0.0.0.0:9443

[meek_lite-options]
url = https://example.com/
front = cdn.example.com

[unrelated]
foo = bar
"#;
        let spec = ServerLaunchSpec::from_ini_str(text).unwrap();
        let names: Vec<&str> = spec.transport_names().collect();
        assert_eq!(names, vec!["obfs4", "meek_lite", "scramblesuit"]);

        let meek = spec.transport("meek_lite").unwrap();
        assert_eq!(meek.options.len(), 2);
        assert_eq!(meek.options["url"], "https://example.com/");
        assert!(spec.transport("obfs4").unwrap().options.is_empty());
        assert!(spec.transport("unrelated").is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        for key in ["exec", "statedir", "forward"] {
            let text: String = BASIC
                .lines()
                .filter(|line| !line.starts_with(key))
                .map(|line| format!("{}\n", line))
                .collect();

            match ServerLaunchSpec::from_ini_str(&text) {
                Err(PtError::MissingConfigField { section, key: missing }) => {
                    assert_eq!(section, "common");
                    assert_eq!(missing, key);
                }
                other => panic!("Expected MissingConfigField for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_blank_required_field_counts_as_missing() {
        let text = BASIC.replace("forward = 127.0.0.1:9001", "forward =");
        assert!(matches!(
            ServerLaunchSpec::from_ini_str(&text),
            Err(PtError::MissingConfigField { .. })
        ));
    }

    #[test]
    fn test_missing_sections() {
        let result = ServerLaunchSpec::from_ini_str("[transports]\nobfs4 = a:1\n");
        assert!(matches!(result, Err(PtError::MissingConfigSection(s)) if s == "common"));

        let without_transports = BASIC.replace("[transports]\nobfs4 = 127.0.0.1:1234\n", "");
        let result = ServerLaunchSpec::from_ini_str(&without_transports);
        assert!(matches!(result, Err(PtError::MissingConfigSection(s)) if s == "transports"));
    }

    #[test]
    fn test_duplicate_transport_name() {
        let text = format!("{}OBFS4 = 127.0.0.1:5678\n", BASIC);
        assert!(matches!(
            ServerLaunchSpec::from_ini_str(&text),
            Err(PtError::DuplicateOption { .. })
        ));
    }

    #[test]
    fn test_empty_transports_parse_but_fail_validation() {
        let text = BASIC.replace("obfs4 = 127.0.0.1:1234\n", "");
        let spec = ServerLaunchSpec::from_ini_str(&text).unwrap();
        assert!(spec.transports.is_empty());
        assert!(matches!(
            spec.validate(),
            Err(PtError::ConfigValidationError(_))
        ));
    }

    #[test]
    fn test_exec_with_arguments() {
        let text = BASIC.replace(
            "exec = /usr/bin/obfs4proxy",
            r#"exec = "/opt/my pt/obfs4proxy" -enableLogging -logLevel 'DEBUG'"#,
        );
        let spec = ServerLaunchSpec::from_ini_str(&text).unwrap();
        assert_eq!(spec.executable, PathBuf::from("/opt/my pt/obfs4proxy"));
        assert_eq!(
            spec.executable_args,
            vec!["-enableLogging", "-logLevel", "DEBUG"]
        );
    }

    #[test]
    fn test_split_command_quoting() {
        assert_eq!(
            split_command(r#"a\ b "c \"d\"" '\e'"#).unwrap(),
            vec!["a b", "c \"d\"", "\\e"]
        );
        assert_eq!(split_command("  ").unwrap(), Vec::<String>::new());
        assert_eq!(split_command("''").unwrap(), vec![""]);
        assert!(split_command("'open").is_err());
        assert!(split_command("trailing\\").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_transport_names() {
        let mut spec = ServerLaunchSpec::from_ini_str(BASIC).unwrap();
        spec.transports[0].name = "a,b".to_string();
        assert!(matches!(
            spec.validate(),
            Err(PtError::ConfigValidationError(_))
        ));

        let mut spec = ServerLaunchSpec::from_ini_str(BASIC).unwrap();
        spec.transports.push(TransportLaunchSpec::new("obfs4", "0.0.0.0:1"));
        assert!(matches!(
            spec.validate(),
            Err(PtError::DuplicateOption { .. })
        ));
    }

    #[test]
    fn test_expand_env_in_string() {
        std::env::set_var("PTSERVER_TEST_HOME", "/home/pt");
        assert_eq!(
            expand_env_in_string("$PTSERVER_TEST_HOME/state"),
            "/home/pt/state"
        );
        assert_eq!(
            expand_env_in_string("${PTSERVER_TEST_HOME}x"),
            "/home/ptx"
        );
        assert_eq!(
            expand_env_in_string("$PTSERVER_TEST_UNSET_VAR/a"),
            "$PTSERVER_TEST_UNSET_VAR/a"
        );
        assert_eq!(expand_env_in_string("cost: 5$"), "cost: 5$");
        assert_eq!(expand_env_in_string("${open"), "${open");
    }

    #[test]
    fn test_parse_toml() {
        let toml_content = r#"
            [common]
            exec = "/usr/bin/obfs4proxy"
            statedir = "/var/lib/pt"
            forward = "127.0.0.1:9001"

            [transports]
            obfs4 = "127.0.0.1:1234"

            [obfs4-options]
            cert = "abc"
            iat-mode = 0
        "#;

        let spec = ServerLaunchSpec::from_toml_str(toml_content).unwrap();
        assert_eq!(spec.transports.len(), 1);
        assert_eq!(spec.transports[0].options["cert"], "abc");
        assert_eq!(spec.transports[0].options["iat-mode"], "0");
    }

    #[test]
    fn test_parse_toml_rejects_arrays() {
        let toml_content = r#"
            [common]
            exec = ["/usr/bin/obfs4proxy"]
        "#;
        assert!(matches!(
            ServerLaunchSpec::from_toml_str(toml_content),
            Err(PtError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_from_file_ini() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("server.ini");
        fs::write(&config_path, BASIC).unwrap();

        let spec = ServerLaunchSpec::from_file(&config_path).unwrap();
        assert_eq!(spec.transports[0].name, "obfs4");
    }

    #[test]
    fn test_from_file_unreadable() {
        let result = ServerLaunchSpec::from_file(Path::new("/nonexistent/ptserver.ini"));
        assert!(matches!(result, Err(PtError::ConfigError(_))));
    }
}
