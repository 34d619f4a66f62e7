//! Names of generated objects.

/// Maximum length of a DNS-1123 label
pub const MAX_NAME_LENGTH: usize = 63;

const SUFFIX_LENGTH: usize = 7;

/// Lowercases `value`, collapses every run of non-alphanumerics into a
/// single `-`, trims leading and trailing `-`, and caps the result at 63
/// characters.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    truncate(slug)
}

fn truncate(mut name: String) -> String {
    name.truncate(MAX_NAME_LENGTH);
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Joins already-slugified parts with `-`, keeping the result a valid name.
fn join(prefix: &str, suffix: &str) -> String {
    truncate(slugify(&format!("{prefix}-{suffix}")))
}

/// Name of the Environment an Application creates for `branch`
pub fn environment_name(application: &str, branch: &str) -> String {
    join(application, branch)
}

/// Name of the Deployment an Environment creates for a repository
pub fn deployment_name(environment: &str, repository: &str) -> String {
    join(environment, repository)
}

/// Deterministic name of a Deployment's workspace claim
pub fn workspace_claim_name(deployment: &str) -> String {
    join(deployment, "workspace")
}

/// Label value naming an object. Labels are capped at 63 characters while
/// object names may be longer, so long names are cut; owners are still told
/// apart by UID.
pub fn label_value(name: &str) -> String {
    let mut value: String = name.chars().take(MAX_NAME_LENGTH).collect();
    while value.ends_with(|c: char| !c.is_ascii_alphanumeric()) {
        value.pop();
    }
    value
}

/// Appends a random 7-character suffix, used once a deterministic name collided.
pub fn with_random_suffix(name: &str) -> String {
    let suffix = random_suffix();
    let mut base = name.to_string();
    base.truncate(MAX_NAME_LENGTH - SUFFIX_LENGTH - 1);
    while base.ends_with('-') {
        base.pop();
    }
    format!("{base}-{suffix}")
}

/// 7 lowercase alphanumeric characters drawn from a random UUID
pub fn random_suffix() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(SUFFIX_LENGTH)
        .map(|b| ALPHABET[usize::from(*b) % ALPHABET.len()] as char)
        .collect()
}
