//! SQLite-backed storage for named connection profiles.

use chrono::{DateTime, Utc};
use myssh_core::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_path: &Path) -> Result<Self> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
                restrict_permissions(parent).await?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        debug!(path = %database_path.display(), "Profile database opened");
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                user TEXT NOT NULL,
                password TEXT,
                key_path TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn create_profile(&self, profile: &Profile) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO profiles (id, name, host, port, user, password, key_path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(profile.id.to_string())
        .bind(&profile.name)
        .bind(&profile.host)
        .bind(i64::from(profile.port))
        .bind(&profile.user)
        .bind(&profile.password)
        .bind(profile.key_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(event = "profile_created", name = %profile.name, host = %profile.host, "Profile created");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(MysshError::ProfileExists(profile.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_profile_by_name(&self, name: &str) -> Result<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Profile::try_from).transpose()
    }

    pub async fn list_profiles(&self) -> Result<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>("SELECT * FROM profiles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Profile::try_from).collect()
    }

    /// Apply a partial update to the named profile and return the result.
    pub async fn update_profile(&self, name: &str, update: ProfileUpdate) -> Result<Profile> {
        let mut profile = self
            .get_profile_by_name(name)
            .await?
            .ok_or_else(|| MysshError::ProfileNotFound(name.to_string()))?;

        update.apply(&mut profile);

        sqlx::query(
            r#"
            UPDATE profiles
            SET host = ?, port = ?, user = ?, password = ?, key_path = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&profile.host)
        .bind(i64::from(profile.port))
        .bind(&profile.user)
        .bind(&profile.password)
        .bind(profile.key_path.as_ref().map(|p| p.to_string_lossy().to_string()))
        .bind(profile.updated_at.to_rfc3339())
        .bind(profile.id.to_string())
        .execute(&self.pool)
        .await?;

        info!(event = "profile_updated", name = %profile.name, "Profile updated");
        Ok(profile)
    }

    pub async fn delete_profile(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM profiles WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MysshError::ProfileNotFound(name.to_string()));
        }

        info!(event = "profile_deleted", name = %name, "Profile deleted");
        Ok(())
    }

    /// Resolve connection parameters from an optional profile and explicit overrides.
    pub async fn resolve(
        &self,
        profile_name: Option<&str>,
        overrides: ConnectionOverrides,
    ) -> Result<ResolvedConnection> {
        let profile = match profile_name {
            Some(name) => Some(
                self.get_profile_by_name(name)
                    .await?
                    .ok_or_else(|| MysshError::ProfileNotFound(name.to_string()))?,
            ),
            None => None,
        };

        let resolved = overrides.resolve(profile.as_ref())?;
        debug!(
            profile = ?profile_name,
            target = %resolved,
            "Resolved connection parameters"
        );
        Ok(resolved)
    }
}

#[cfg(unix)]
async fn restrict_permissions(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_dir: &Path) -> Result<()> {
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: String,
    name: String,
    host: String,
    port: i64,
    user: String,
    password: Option<String>,
    key_path: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = MysshError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        Ok(Profile {
            id: Uuid::parse_str(&row.id).map_err(|e| MysshError::Parse(e.to_string()))?,
            port: u16::try_from(row.port)
                .map_err(|_| MysshError::Parse(format!("invalid port {} for profile {}", row.port, row.name)))?,
            name: row.name,
            host: row.host,
            user: row.user,
            password: row.password,
            key_path: row.key_path.map(PathBuf::from),
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MysshError::Parse(format!("invalid timestamp '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_db(dir: &TempDir) -> Database {
        Database::new(&dir.path().join("profiles.db")).await.unwrap()
    }

    fn sample(name: &str) -> Profile {
        let mut profile = Profile::new(name, format!("{}.example.com", name), 22, "admin");
        profile.password = Some("secret".into());
        profile
    }

    #[tokio::test]
    async fn test_create_and_get_profile() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let profile = sample("web");
        db.create_profile(&profile).await.unwrap();

        let loaded = db.get_profile_by_name("web").await.unwrap().unwrap();
        assert_eq!(loaded.id, profile.id);
        assert_eq!(loaded.host, "web.example.com");
        assert_eq!(loaded.port, 22);
        assert_eq!(loaded.password.as_deref(), Some("secret"));
        assert!(loaded.key_path.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_profile_rejected() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        db.create_profile(&sample("web")).await.unwrap();
        let err = db.create_profile(&sample("web")).await.unwrap_err();
        assert!(matches!(err, MysshError::ProfileExists(name) if name == "web"));
    }

    #[tokio::test]
    async fn test_list_profiles_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        for name in ["zeta", "alpha", "mid"] {
            db.create_profile(&sample(name)).await.unwrap();
        }

        let names: Vec<String> = db
            .list_profiles()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_update_profile() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;
        db.create_profile(&sample("web")).await.unwrap();

        let update = ProfileUpdate {
            port: Some(2222),
            key_path: Some(PathBuf::from("/keys/id_ed25519")),
            ..Default::default()
        };
        db.update_profile("web", update).await.unwrap();

        let loaded = db.get_profile_by_name("web").await.unwrap().unwrap();
        assert_eq!(loaded.port, 2222);
        assert_eq!(loaded.host, "web.example.com");
        assert_eq!(loaded.key_path, Some(PathBuf::from("/keys/id_ed25519")));
        assert_eq!(loaded.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_update_missing_profile() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let err = db
            .update_profile("ghost", ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MysshError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_profile() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;
        db.create_profile(&sample("web")).await.unwrap();

        db.delete_profile("web").await.unwrap();
        assert!(db.get_profile_by_name("web").await.unwrap().is_none());

        let err = db.delete_profile("web").await.unwrap_err();
        assert!(matches!(err, MysshError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_with_profile_and_overrides() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;
        db.create_profile(&sample("web")).await.unwrap();

        let overrides = ConnectionOverrides {
            user: Some("root".into()),
            ..Default::default()
        };
        let resolved = db.resolve(Some("web"), overrides).await.unwrap();

        assert_eq!(resolved.host, "web.example.com");
        assert_eq!(resolved.user, "root");
        assert_eq!(resolved.credentials.password.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_profile() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir).await;

        let err = db
            .resolve(Some("ghost"), ConnectionOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MysshError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_database_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("myssh.db");

        Database::new(&path).await.unwrap();
        assert!(path.exists());
    }
}
