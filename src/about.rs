pub const LINEAGE_DISPLAY_VERSION: &str = env!("LINEAGE_DISPLAY_VERSION");
pub const LINEAGE_BUILD_N: &str = env!("LINEAGE_BUILD_N");

pub fn version_cli_text() -> String {
    format!(
        "cell-lineage {}\nBuild {}\nCell lineage correction engine",
        LINEAGE_DISPLAY_VERSION, LINEAGE_BUILD_N
    )
}
