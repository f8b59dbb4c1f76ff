mod vault;

pub use vault::{VaultError, VaultPaths, VaultReport, build_vault};
