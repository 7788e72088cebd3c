/// Directory (under the vendor dir) holding engine bookkeeping such as staged downloads.
pub const STATE_DIR_NAME: &str = ".stevedore";

/// File name of the persisted installed store inside the vendor dir.
pub const INSTALLED_FILENAME: &str = "installed.json";

pub const ENV_VENDOR_DIR: &str = "STEVEDORE_VENDOR_DIR";
pub const ENV_BIN_DIR: &str = "STEVEDORE_BIN_DIR";
pub const ENV_PARALLELISM: &str = "STEVEDORE_PARALLELISM";
pub const ENV_ALLOW_PLUGINS: &str = "STEVEDORE_ALLOW_PLUGINS";
pub const ENV_NOTIFY: &str = "STEVEDORE_NOTIFY";
