//! Built-in entities backing the rule engine and the audit trail.

use crate::config::types::*;

pub const USER_RESOURCE: &str = "admin_user";
pub const GROUP_RESOURCE: &str = "admin_group";
pub const LOG_RESOURCE: &str = "admin_log";

/// Values accepted in `admin_user.role`.
pub const ROLE_TIERS: [i64; 5] = [0, 1, 16, 32, 64];

fn column(name: &str, ty: &str) -> ColumnConfig {
    ColumnConfig {
        name: name.into(),
        type_: ColumnTypeConfig::Simple(ty.into()),
        nullable: true,
        default: None,
        unique: false,
        read_only: false,
        on_update_now: false,
        values: Vec::new(),
        items: None,
        reference: None,
        validation: ValidationRule::default(),
    }
}

fn not_null(mut c: ColumnConfig) -> ColumnConfig {
    c.nullable = false;
    c
}

fn admin_entity(name: &str, columns: Vec<ColumnConfig>, timestamps: bool) -> EntityConfig {
    EntityConfig {
        group: Some("admin".into()),
        name: name.into(),
        schema: None,
        table: None,
        primary_key: PrimaryKeyConfig::Single("id".into()),
        columns,
        unique: Vec::new(),
        foreign_keys: Vec::new(),
        relations: Vec::new(),
        indexes: Vec::new(),
        timestamps,
    }
}

pub fn user_entity() -> EntityConfig {
    let mut email = not_null(column("email", "varchar(255)"));
    email.unique = true;
    email.validation.format = Some("email".into());

    let mut role = not_null(column("role", "smallint"));
    role.default = Some(ColumnDefaultConfig::Literal("0".into()));
    role.validation.one_of = ROLE_TIERS.iter().map(|&tier| tier.into()).collect();

    let mut group_ids = column("group_ids", "jsonb");
    group_ids.items = Some("integer".into());
    group_ids.reference = Some(GROUP_RESOURCE.into());

    admin_entity(
        "user",
        vec![
            not_null(column("id", "serial")),
            column("name", "varchar(255)"),
            email,
            column("icon", "text"),
            role,
            group_ids,
        ],
        true,
    )
}

pub fn group_entity() -> EntityConfig {
    let mut name = not_null(column("name", "varchar(64)"));
    name.unique = true;
    let mut rules = column("rules", "jsonb");
    rules.validation.format = Some(crate::schema::RULES_FORMAT.into());
    admin_entity(
        "group",
        vec![
            not_null(column("id", "serial")),
            name,
            rules,
        ],
        true,
    )
}

pub fn log_entity() -> EntityConfig {
    let mut user_id = not_null(column("user_id", "integer"));
    user_id.reference = Some(USER_RESOURCE.into());
    let mut entity = admin_entity(
        "log",
        vec![
            not_null(column("id", "serial")),
            user_id,
            not_null(column("action", "varchar(64)")),
            column("args", "jsonb"),
            column("ret", "jsonb"),
            timestamp_column("created_at", false),
        ],
        false,
    );
    entity.indexes.push(IndexConfig {
        name: "admin_log_user_id_idx".into(),
        columns: vec!["user_id".into()],
        unique: false,
    });
    entity
}

pub fn builtin_entities() -> Vec<EntityConfig> {
    vec![user_entity(), group_entity(), log_entity()]
}

impl CatalogConfig {
    /// Prepend the built-in admin entities unless the file already defines them.
    pub fn with_builtins(mut self) -> Self {
        let mut entities: Vec<EntityConfig> = builtin_entities()
            .into_iter()
            .filter(|b| {
                !self
                    .entities
                    .iter()
                    .any(|e| e.resource_name() == b.resource_name())
            })
            .collect();
        entities.append(&mut self.entities);
        self.entities = entities;
        self
    }
}
