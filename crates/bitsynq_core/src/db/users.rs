use super::{new_id, now, require_admin};
use crate::error::{Error, Result};
use crate::schema::{Aliases, MemberRole, Project, ProjectStatus, RosterMember, User};
use crate::settlement::is_valid_address;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

pub fn create_user(conn: &Connection, email: &str, display_name: &str) -> Result<User> {
    let email = email.trim().to_lowercase();
    let display_name = display_name.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::Validation(format!("invalid email: {email:?}")));
    }
    if display_name.is_empty() {
        return Err(Error::Validation("display_name is required".to_string()));
    }
    if find_user_by_email(conn, &email)?.is_some() {
        return Err(Error::Validation(format!("a user with email {email} already exists")));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO users (id, email, display_name) VALUES (?1, ?2, ?3)",
        params![id, email, display_name],
    )?;
    info!(user_id = %id, "created user");
    get_user(conn, &id)
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<User> {
    let row = conn
        .query_row(
            "SELECT id, email, display_name, aliases_json, wallet_address, created_at
             FROM users WHERE id = ?1",
            params![user_id],
            user_row,
        )
        .optional()?;
    Ok(row
        .ok_or_else(|| Error::NotFound(format!("user {user_id}")))?
        .into_user())
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, email, display_name, aliases_json, wallet_address, created_at
             FROM users WHERE email = ?1",
            params![email.trim().to_lowercase()],
            user_row,
        )
        .optional()?;
    Ok(row.map(UserRow::into_user))
}

pub fn set_aliases(conn: &Connection, user_id: &str, aliases: &[String]) -> Result<()> {
    let cleaned: Vec<&str> = aliases
        .iter()
        .map(|alias| alias.trim())
        .filter(|alias| !alias.is_empty())
        .collect();
    let aliases_json = serde_json::to_string(&cleaned)?;
    let changed = conn.execute(
        "UPDATE users SET aliases_json = ?1 WHERE id = ?2",
        params![aliases_json, user_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

pub fn set_wallet(conn: &Connection, user_id: &str, wallet_address: &str) -> Result<()> {
    if !is_valid_address(wallet_address) {
        return Err(Error::Validation(format!("invalid wallet address: {wallet_address}")));
    }
    let changed = conn.execute(
        "UPDATE users SET wallet_address = ?1 WHERE id = ?2",
        params![wallet_address.to_lowercase(), user_id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Creates the project with its owner as the first admin.
pub fn create_project(
    conn: &Connection,
    owner_id: &str,
    name: &str,
    description: Option<&str>,
    token_symbol: Option<&str>,
) -> Result<Project> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("project name is required".to_string()));
    }
    get_user(conn, owner_id)?;

    let id = new_id();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO projects (id, name, description, owner_id, token_symbol)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, name, description, owner_id, token_symbol],
    )?;
    insert_member(&tx, &id, owner_id, MemberRole::Admin)?;
    tx.commit()?;

    info!(project_id = %id, "created project");
    get_project(conn, &id)
}

pub fn get_project(conn: &Connection, project_id: &str) -> Result<Project> {
    let row = conn
        .query_row(
            "SELECT id, name, description, owner_id, token_symbol, status, created_at
             FROM projects WHERE id = ?1",
            params![project_id],
            project_row,
        )
        .optional()?;
    row.ok_or_else(|| Error::NotFound(format!("project {project_id}")))?
        .into_project()
}

/// Projects the user belongs to, newest first.
pub fn list_projects(conn: &Connection, user_id: &str) -> Result<Vec<Project>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT p.id, p.name, p.description, p.owner_id, p.token_symbol, p.status, p.created_at
        FROM projects p
        INNER JOIN project_members pm ON pm.project_id = p.id
        WHERE pm.user_id = ?1
        ORDER BY p.created_at DESC
        "#,
    )?;
    let rows = stmt.query_map(params![user_id], project_row)?;

    let mut projects = Vec::new();
    for r in rows {
        projects.push(r?.into_project()?);
    }
    Ok(projects)
}

pub fn add_member(
    conn: &Connection,
    project_id: &str,
    actor: &str,
    user_id: &str,
    role: MemberRole,
) -> Result<()> {
    require_admin(conn, project_id, actor, "add members")?;
    get_user(conn, user_id)?;
    if super::membership_role(conn, project_id, user_id)?.is_some() {
        return Err(Error::Validation(format!(
            "user {user_id} is already a member of project {project_id}"
        )));
    }

    let tx = conn.unchecked_transaction()?;
    insert_member(&tx, project_id, user_id, role)?;
    tx.commit()?;
    info!(project_id, user_id, role = role.as_str(), "added project member");
    Ok(())
}

/// Members in join order, aliases left as the stored JSON string.
pub fn roster(conn: &Connection, project_id: &str) -> Result<Vec<RosterMember>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT u.id, u.display_name, u.email, u.aliases_json
        FROM project_members pm
        INNER JOIN users u ON pm.user_id = u.id
        WHERE pm.project_id = ?1
        ORDER BY pm.rowid
        "#,
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok(RosterMember {
            id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            aliases: Some(Aliases::Encoded(row.get(3)?)),
        })
    })?;

    let mut members = Vec::new();
    for r in rows {
        members.push(r?);
    }
    Ok(members)
}

fn insert_member(conn: &Connection, project_id: &str, user_id: &str, role: MemberRole) -> Result<()> {
    let now = now(conn)?;
    conn.execute(
        "INSERT INTO project_members (project_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![project_id, user_id, role.as_str(), now],
    )?;
    conn.execute(
        r#"
        INSERT INTO user_balances (user_id, project_id, balance, total_contributed, last_updated)
        VALUES (?1, ?2, 0, 0, ?3)
        ON CONFLICT(user_id, project_id) DO NOTHING
        "#,
        params![user_id, project_id, now],
    )?;
    Ok(())
}

#[derive(Debug)]
struct UserRow {
    id: String,
    email: String,
    display_name: String,
    aliases_json: String,
    wallet_address: Option<String>,
    created_at: String,
}

impl UserRow {
    fn into_user(self) -> User {
        User {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            aliases: Aliases::Encoded(self.aliases_json).resolve(),
            wallet_address: self.wallet_address,
            created_at: self.created_at,
        }
    }
}

fn user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        aliases_json: row.get(3)?,
        wallet_address: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[derive(Debug)]
struct ProjectRow {
    id: String,
    name: String,
    description: Option<String>,
    owner_id: String,
    token_symbol: Option<String>,
    status: String,
    created_at: String,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        Ok(Project {
            id: self.id,
            name: self.name,
            description: self.description,
            owner_id: self.owner_id,
            token_symbol: self.token_symbol,
            status: ProjectStatus::parse(&self.status)?,
            created_at: self.created_at,
        })
    }
}

fn project_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        owner_id: row.get(3)?,
        token_symbol: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
    })
}
