//! Package entity as handed over by the resolver.
//!
//! The engine only reads a handful of fields from a package: its name, its
//! declared type, and the `plugin-modifies-downloads` flag in the extra bag.
//! Everything else is carried through untouched so it can be persisted in the
//! installed store.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type of ordinary code packages.
pub const TYPE_LIBRARY: &str = "library";

/// Type of plugins that hook into the package manager itself.
pub const TYPE_PLUGIN: &str = "composer-plugin";

/// Type of packages that provide custom installers for other package types.
pub const TYPE_INSTALLER: &str = "composer-installer";

/// Type of packages with no payload, only dependencies.
pub const TYPE_METAPACKAGE: &str = "metapackage";

/// Type of a project root package.
pub const TYPE_PROJECT: &str = "project";

/// Extra flag set by plugins that change how later downloads are fetched.
pub const EXTRA_PLUGIN_MODIFIES_DOWNLOADS: &str = "plugin-modifies-downloads";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
  pub name: String,
  pub version: String,

  #[serde(rename = "type", default = "default_type")]
  pub package_type: String,

  #[serde(default, skip_serializing_if = "Map::is_empty")]
  pub extra: Map<String, Value>,

  /// Where the distributable artifact can be fetched from.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dist_url: Option<String>,

  /// Endpoint to notify after this package was installed or updated.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub notification_url: Option<String>,

  /// Executables, relative to the install path, to expose in the bin dir.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub binaries: Vec<String>,

  /// Set when this package is an alias; holds the version it aliases.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub alias_of: Option<String>,
}

fn default_type() -> String {
  TYPE_LIBRARY.to_string()
}

impl Package {
  pub fn new(name: impl Into<String>, version: impl Into<String>, package_type: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      version: version.into(),
      package_type: package_type.into(),
      extra: Map::new(),
      dist_url: None,
      notification_url: None,
      binaries: Vec::new(),
      alias_of: None,
    }
  }

  pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
    self.extra.insert(key.into(), value);
    self
  }

  pub fn with_dist_url(mut self, url: impl Into<String>) -> Self {
    self.dist_url = Some(url.into());
    self
  }

  pub fn with_notification_url(mut self, url: impl Into<String>) -> Self {
    self.notification_url = Some(url.into());
    self
  }

  pub fn with_binaries<I, S>(mut self, binaries: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.binaries = binaries.into_iter().map(Into::into).collect();
    self
  }

  pub fn is_plugin(&self) -> bool {
    self.package_type == TYPE_PLUGIN
  }

  /// Whether applying this package may register new installer backends.
  pub fn extends_installers(&self) -> bool {
    self.package_type == TYPE_PLUGIN || self.package_type == TYPE_INSTALLER
  }

  /// Whether this plugin declares that it alters how later downloads are fetched.
  pub fn modifies_downloads(&self) -> bool {
    self.is_plugin()
      && self
        .extra
        .get(EXTRA_PLUGIN_MODIFIES_DOWNLOADS)
        .and_then(Value::as_bool)
        .unwrap_or(false)
  }

  pub fn is_alias(&self) -> bool {
    self.alias_of.is_some()
  }

  /// Key under which the installed store records this package.
  ///
  /// Aliases share their target's name, so they are keyed by name and version.
  pub fn store_key(&self) -> String {
    match self.alias_of {
      Some(_) => format!("{}@{}", self.name, self.version),
      None => self.name.clone(),
    }
  }
}

impl fmt::Display for Package {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.name, self.version)
  }
}
