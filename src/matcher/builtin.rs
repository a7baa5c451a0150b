//! Custom predicates shipped with the service binary

use super::{CustomMatcherRegistry, RegistryError};

/// Oldest age the `age` predicate accepts
const MAX_AGE: u8 = 130;

fn is_number(text: &str) -> bool {
    text.trim().parse::<i64>().is_ok()
}

fn is_age(text: &str) -> bool {
    text.trim().parse::<u8>().is_ok_and(|age| age <= MAX_AGE)
}

fn is_yes_no(text: &str) -> bool {
    matches!(
        text.trim().to_lowercase().as_str(),
        "y" | "yes" | "n" | "no"
    )
}

/// Register `number`, `age` and `yes_no`
pub fn register_builtins(registry: &CustomMatcherRegistry) -> Result<(), RegistryError> {
    registry.register("number", is_number)?;
    registry.register("age", is_age)?;
    registry.register("yes_no", is_yes_no)?;
    Ok(())
}
