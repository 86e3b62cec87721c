use crate::models::{MessageRow, OpportunityRow, ProfileRow, RoomInsert, RoomRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const MESSAGE_COLUMNS: &str = "m.id, m.chat_room_id, m.sender_id, m.message, m.is_system_message, m.created_at,
         p.email, p.first_name, p.last_name";

impl Database {
    // -- Profiles --

    pub fn insert_profile(
        &self,
        id: &str,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, email, first_name, last_name, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, email, first_name, last_name, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<ProfileRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, email, first_name, last_name, created_at FROM profiles WHERE id = ?1",
                [id],
                |row| {
                    Ok(ProfileRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Opportunities --

    pub fn insert_opportunity(&self, id: &str, title: &str, created_by: &str, created_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO opportunities (id, title, created_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                (id, title, created_by, created_at),
            )?;
            Ok(())
        })
    }

    pub fn get_opportunity(&self, id: &str) -> Result<Option<OpportunityRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, created_by, created_at FROM opportunities WHERE id = ?1",
                [id],
                |row| {
                    Ok(OpportunityRow {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        created_by: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    // -- Chat rooms --

    pub fn get_room_by_opportunity(&self, opportunity_id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room_by_opportunity(conn, opportunity_id))
    }

    /// Binds a new room to `opportunity_id` unless one already exists.
    /// Never fails on the uniqueness constraint; the caller learns about
    /// the lost race through [`RoomInsert::AlreadyExists`].
    pub fn create_room(&self, id: &str, opportunity_id: &str, created_at: &str) -> Result<RoomInsert> {
        self.with_conn(|conn| {
            let opportunity_exists: Option<i64> = conn
                .query_row("SELECT 1 FROM opportunities WHERE id = ?1", [opportunity_id], |row| row.get(0))
                .optional()?;
            if opportunity_exists.is_none() {
                return Ok(RoomInsert::MissingOpportunity);
            }

            let inserted = conn.execute(
                "INSERT INTO chat_rooms (id, opportunity_id, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(opportunity_id) DO NOTHING",
                (id, opportunity_id, created_at),
            )?;

            if inserted == 0 {
                return Ok(RoomInsert::AlreadyExists);
            }

            Ok(RoomInsert::Created(RoomRow {
                id: id.to_string(),
                opportunity_id: opportunity_id.to_string(),
                created_at: created_at.to_string(),
            }))
        })
    }

    // -- Chat messages --

    /// Appends a message and returns the stored row joined with its sender.
    /// Returns `None` when the room does not exist.
    pub fn insert_message(
        &self,
        id: &str,
        chat_room_id: &str,
        sender_id: Option<&str>,
        message: &str,
        is_system_message: bool,
        created_at: &str,
    ) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let room_exists: Option<i64> = conn
                .query_row("SELECT 1 FROM chat_rooms WHERE id = ?1", [chat_room_id], |row| row.get(0))
                .optional()?;
            if room_exists.is_none() {
                return Ok(None);
            }

            conn.execute(
                "INSERT INTO chat_messages (id, chat_room_id, sender_id, message, is_system_message, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, chat_room_id, sender_id, message, is_system_message, created_at],
            )?;

            query_message(conn, id)
        })
    }

    /// Full history of a room, oldest first.
    pub fn get_messages(&self, chat_room_id: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, chat_room_id))
    }
}

fn query_room_by_opportunity(conn: &Connection, opportunity_id: &str) -> Result<Option<RoomRow>> {
    conn.query_row(
        "SELECT id, opportunity_id, created_at FROM chat_rooms WHERE opportunity_id = ?1",
        [opportunity_id],
        |row| {
            Ok(RoomRow {
                id: row.get(0)?,
                opportunity_id: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )
    .optional()
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM chat_messages m
         LEFT JOIN profiles p ON m.sender_id = p.id
         WHERE m.id = ?1"
    );
    conn.query_row(&sql, [id], message_from_row).optional()
}

fn query_messages(conn: &Connection, chat_room_id: &str) -> Result<Vec<MessageRow>> {
    // JOIN profiles so sender names come back in a single query
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM chat_messages m
         LEFT JOIN profiles p ON m.sender_id = p.id
         WHERE m.chat_room_id = ?1
         ORDER BY m.created_at ASC, m.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map([chat_room_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_room_id: row.get(1)?,
        sender_id: row.get(2)?,
        message: row.get(3)?,
        is_system_message: row.get(4)?,
        created_at: row.get(5)?,
        sender_email: row.get(6)?,
        sender_first_name: row.get(7)?,
        sender_last_name: row.get(8)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
