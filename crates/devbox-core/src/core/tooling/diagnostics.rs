pub mod commands {
    pub const ENTRYPOINT: &str = "DBX100";
    pub const RECONCILE: &str = "DBX110";
    pub const BOOTSTRAP: &str = "DBX120";
    pub const AUDIT: &str = "DBX200";
    pub const READY: &str = "DBX210";
    pub const LIFECYCLE: &str = "DBX300";
    pub const GENERIC: &str = "DBX000";
}
