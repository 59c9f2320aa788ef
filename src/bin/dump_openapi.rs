use std::fs;

fn main() -> anyhow::Result<()> {
    let site_url = std::env::var("SITE_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
    let doc = cvo_backoffice::docs::build_openapi(&site_url)?;
    let s = serde_json::to_string_pretty(&doc)?;

    let path = std::env::args().nth(1).unwrap_or_else(|| "openapi.json".to_string());
    fs::write(&path, s)?;
    println!("wrote {}", path);
    Ok(())
}
