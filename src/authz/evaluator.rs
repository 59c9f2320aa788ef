use std::collections::BTreeSet;

use super::role_names::ADMIN;

/// Case-insensitive role name match. The `admin` requirement also accepts
/// localized variants such as "Administrador".
pub fn role_matches(held: &str, required: &str) -> bool {
    let held = held.trim().to_lowercase();
    let required = required.trim().to_lowercase();

    if held == required {
        return true;
    }

    required == ADMIN && held.contains(ADMIN)
}

pub fn holds_any_role(held: &BTreeSet<String>, required: &[&str]) -> bool {
    held.iter()
        .any(|role| required.iter().any(|wanted| role_matches(role, wanted)))
}

pub fn holds_admin(held: &BTreeSet<String>) -> bool {
    holds_any_role(held, &[ADMIN])
}
