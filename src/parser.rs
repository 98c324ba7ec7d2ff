use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct Stafett {
    #[serde(default)]
    pub setup: Setup,
    #[serde(default)]
    pub global: Global,
    /// Kept in declaration order; a variable may use the ones above it.
    #[serde(default)]
    pub vars: serde_json::Map<String, serde_json::Value>,
    pub test_groups: Vec<TestGroup>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Setup {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Global {
    pub headers: Option<toml::Value>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestGroup {
    pub name: String,
    pub tests: Vec<Test>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Test {
    pub id: Option<String>,
    pub name: String,
    pub method: String,
    pub url: String,
    pub assert_status: i64,
    pub body: Option<serde_json::Value>,
    pub query: Option<toml::Value>,
    pub headers: Option<toml::Value>,
}
