use std::fmt;

/// Walk an error's source chain in Debug output, so operators see the root
/// cause and not just the outermost message.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}
