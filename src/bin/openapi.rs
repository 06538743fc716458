use anyhow::Result;

fn main() -> Result<()> {
    let spec = sesamo::api::openapi();
    println!("{}", spec.to_pretty_json()?);
    Ok(())
}
