use super::Migration;

/// Revisions compiled into the binary, in chain order.
pub fn embedded_migrations() -> Vec<Migration> {
    vec![
        Migration {
            revision: "001_initial",
            down_revision: None,
            description: "Initial schema creation",
            up: include_str!("../../migrations/001_initial.up.sql"),
            down: include_str!("../../migrations/001_initial.down.sql"),
        },
        Migration {
            revision: "002_add_name",
            down_revision: Some("001_initial"),
            description: "Add name column to investor_profiles",
            up: include_str!("../../migrations/002_add_name.up.sql"),
            down: include_str!("../../migrations/002_add_name.down.sql"),
        },
    ]
}
