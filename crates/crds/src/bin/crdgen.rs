//! Prints the Devbot CRDs as YAML, ready for `kubectl apply -f -`.

fn main() -> Result<(), crds::CrdError> {
    print!("{}", crds::render_crds()?);
    Ok(())
}
