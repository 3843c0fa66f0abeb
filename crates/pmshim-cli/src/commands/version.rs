use super::print_json;
use miette::Result;
use pmshim_core::version::VersionInfo;

pub fn run(json: bool) -> Result<()> {
    let info = VersionInfo::CURRENT;
    if json {
        return print_json(&serde_json::json!({
            "ok": true,
            "version": info.version,
            "store_layout": info.store_layout,
        }));
    }
    println!("{info}");
    Ok(())
}
