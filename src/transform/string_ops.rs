use std::borrow::Cow;

use heck::ToSnakeCase;

/// Returns a lowercase representation, reusing the original string if already lowercase.
pub fn lowercase(input: &str) -> Cow<'_, str> {
    if input.chars().all(|ch| !ch.is_uppercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.to_lowercase())
    }
}

/// Returns an uppercase representation, avoiding allocation when unnecessary.
pub fn uppercase(input: &str) -> Cow<'_, str> {
    if input.chars().all(|ch| !ch.is_lowercase()) {
        Cow::Borrowed(input)
    } else {
        Cow::Owned(input.to_uppercase())
    }
}

/// Lowercases and drops every non-alphanumeric character, so `Emp_ID`,
/// `emp-id` and `EMP ID` all compact to `empid`.
pub fn compact(input: &str) -> String {
    input
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Splits a header into lowercase word tokens on separators and camel-case
/// boundaries: `EmployeeID` becomes `["employee", "id"]`, `FName` becomes
/// `["f", "name"]`.
pub fn tokens(input: &str) -> Vec<String> {
    input
        .to_snake_case()
        .split('_')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
