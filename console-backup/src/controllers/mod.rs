pub mod backups;
pub mod health;
