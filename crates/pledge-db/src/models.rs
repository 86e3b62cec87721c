/// Row types as read from SQLite.
/// Distinct from pledge-types models to keep the DB layer independent.

pub struct ProfileRow {
    pub id: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: String,
}

pub struct OpportunityRow {
    pub id: String,
    pub title: String,
    pub created_by: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub opportunity_id: String,
    pub created_at: String,
}

/// A chat message joined with its sender's profile columns.
pub struct MessageRow {
    pub id: String,
    pub chat_room_id: String,
    pub sender_id: Option<String>,
    pub message: String,
    pub is_system_message: bool,
    pub created_at: String,
    pub sender_email: Option<String>,
    pub sender_first_name: Option<String>,
    pub sender_last_name: Option<String>,
}

/// Outcome of an idempotent room insert.
pub enum RoomInsert {
    Created(RoomRow),
    /// Another caller already bound a room to this opportunity
    AlreadyExists,
    MissingOpportunity,
}
