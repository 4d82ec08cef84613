pub const APPLICATION_NAME: &str = "Vero";
pub const APPLICATION_VERSION: &str = env!("CARGO_PKG_VERSION");

#[must_use]
pub fn version_with_platform() -> String {
    format!("{APPLICATION_NAME}/{APPLICATION_VERSION}/{}", std::env::consts::OS)
}

#[must_use]
pub fn user_agent() -> String {
    format!("{APPLICATION_NAME}/{APPLICATION_VERSION}")
}
