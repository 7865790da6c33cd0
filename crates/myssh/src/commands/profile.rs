use anyhow::{Result, bail};
use myssh_core::{ClientConfig, Profile, ProfileUpdate};

use super::open_database;
use crate::ProfileCommands;

pub async fn handle(config: &ClientConfig, command: ProfileCommands) -> Result<()> {
    let db = open_database(config).await?;

    match command {
        ProfileCommands::Add {
            name,
            host,
            user,
            port,
            password,
            key,
        } => {
            let mut profile = Profile::new(name, host, port, user);
            profile.password = password;
            profile.key_path = key;
            db.create_profile(&profile).await?;

            println!("Profile saved:");
            print_profile(&profile);
        }

        ProfileCommands::Edit {
            name,
            host,
            user,
            port,
            password,
            key,
        } => {
            let update = ProfileUpdate {
                host,
                port,
                user,
                password,
                key_path: key,
            };
            if update.is_empty() {
                bail!("Nothing to change for profile {}", name);
            }

            let profile = db.update_profile(&name, update).await?;
            println!("Profile updated:");
            print_profile(&profile);
        }

        ProfileCommands::List { json } => {
            let profiles = db.list_profiles().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else if profiles.is_empty() {
                println!("No profiles saved");
            } else {
                println!("{:<20} {:<40} {:<6} {:<8}", "NAME", "TARGET", "PORT", "AUTH");
                println!("{}", "-".repeat(76));
                for profile in profiles {
                    println!(
                        "{:<20} {:<40} {:<6} {:<8}",
                        profile.name,
                        format!("{}@{}", profile.user, profile.host),
                        profile.port,
                        auth_label(&profile)
                    );
                }
            }
        }

        ProfileCommands::Delete { name } => {
            db.delete_profile(&name).await?;
            println!("Profile {} deleted", name);
        }
    }

    Ok(())
}

fn print_profile(profile: &Profile) {
    println!("  Name: {}", profile.name);
    println!("  Target: {}@{}:{}", profile.user, profile.host, profile.port);
    if let Some(key) = &profile.key_path {
        println!("  Key: {}", key.display());
    }
    println!("  Auth: {}", auth_label(profile));
}

fn auth_label(profile: &Profile) -> &'static str {
    match (profile.key_path.is_some(), profile.password.is_some()) {
        (true, true) => "key+pass",
        (true, false) => "key",
        (false, true) => "password",
        (false, false) => "none",
    }
}
