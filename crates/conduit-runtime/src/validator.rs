//! Command validation ahead of persistence.
//!
//! Validation runs before any event is appended, so a rejected command
//! leaves no trace in the journal. The default validator checks the
//! structural rules that every connection type shares; protocol-specific
//! checks belong in the worker layer, which sees the live broker.

use conduit_core::{Command, CommandKind, Connection, ConnectivityError};

/// Validates commands against the coordinator's current state.
///
/// Implementations must be cheap and side-effect free; the coordinator
/// calls this inline before touching the event store.
pub trait CommandValidator: Send + Sync {
    /// Checks `command` against the current connection state (if any).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectivityError::Validation`] for malformed payloads
    /// and [`ConnectivityError::ConfigurationInvalid`] for changes the
    /// lifecycle does not permit.
    fn validate(
        &self,
        command: &Command,
        current: Option<&Connection>,
    ) -> Result<(), ConnectivityError>;
}

/// Structural validation shared by all connection types.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCommandValidator;

impl DefaultCommandValidator {
    fn validate_payload(command: &Command, connection: &Connection) -> Result<(), ConnectivityError> {
        if connection.id != command.id {
            return Err(ConnectivityError::validation(format!(
                "connection id `{}` does not match command target `{}`",
                connection.id, command.id,
            )));
        }
        if connection.uri.trim().is_empty() {
            return Err(ConnectivityError::validation(
                "connection uri must not be empty",
            ));
        }
        if connection.client_count == 0 {
            return Err(ConnectivityError::validation(
                "client count must be at least 1",
            ));
        }
        for source in &connection.sources {
            if source.addresses.is_empty() {
                return Err(ConnectivityError::validation(
                    "source must declare at least one address",
                ));
            }
            if source.consumer_count == 0 {
                return Err(ConnectivityError::validation(
                    "source consumer count must be at least 1",
                ));
            }
        }
        for target in &connection.targets {
            if target.address.trim().is_empty() {
                return Err(ConnectivityError::validation(
                    "target address must not be empty",
                ));
            }
        }
        Ok(())
    }
}

impl CommandValidator for DefaultCommandValidator {
    fn validate(
        &self,
        command: &Command,
        current: Option<&Connection>,
    ) -> Result<(), ConnectivityError> {
        match &command.kind {
            CommandKind::Create(connection) | CommandKind::Test(connection) => {
                Self::validate_payload(command, connection)
            }
            CommandKind::Modify(connection) => {
                Self::validate_payload(command, connection)?;
                if let Some(existing) = current {
                    if existing.connection_type != connection.connection_type {
                        return Err(ConnectivityError::configuration_invalid(format!(
                            "connection type cannot change from `{}` to `{}`",
                            existing.connection_type.name(),
                            connection.connection_type.name(),
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use conduit_core::{ConnectionStatus, ConnectionType, Headers, Source};

    fn connection(id: &str) -> Connection {
        Connection {
            id: id.into(),
            connection_type: ConnectionType::Amqp10,
            status: ConnectionStatus::Open,
            uri: "amqp://broker.example:5671".into(),
            client_count: 1,
            sources: vec![],
            targets: vec![],
        }
    }

    fn create_command(connection: Connection) -> Command {
        Command {
            id: connection.id.clone(),
            headers: Headers::empty(),
            kind: CommandKind::Create(connection),
        }
    }

    #[test]
    fn accepts_well_formed_create() {
        let validator = DefaultCommandValidator;
        let command = create_command(connection("ok"));
        assert_matches!(validator.validate(&command, None), Ok(()));
    }

    #[test]
    fn rejects_mismatched_ids() {
        let validator = DefaultCommandValidator;
        let mut command = create_command(connection("payload-id"));
        command.id = "other-id".into();
        assert_matches!(
            validator.validate(&command, None),
            Err(ConnectivityError::Validation { .. })
        );
    }

    #[test]
    fn rejects_zero_client_count() {
        let validator = DefaultCommandValidator;
        let mut conn = connection("c");
        conn.client_count = 0;
        assert_matches!(
            validator.validate(&create_command(conn), None),
            Err(ConnectivityError::Validation { .. })
        );
    }

    #[test]
    fn rejects_empty_uri() {
        let validator = DefaultCommandValidator;
        let mut conn = connection("c");
        conn.uri = "  ".into();
        assert_matches!(
            validator.validate(&create_command(conn), None),
            Err(ConnectivityError::Validation { .. })
        );
    }

    #[test]
    fn rejects_source_without_addresses() {
        let validator = DefaultCommandValidator;
        let mut conn = connection("c");
        conn.sources.push(Source {
            addresses: vec![],
            consumer_count: 1,
            authorization_subjects: vec![],
        });
        assert_matches!(
            validator.validate(&create_command(conn), None),
            Err(ConnectivityError::Validation { .. })
        );
    }

    #[test]
    fn rejects_type_change_on_modify() {
        let validator = DefaultCommandValidator;
        let existing = connection("c");
        let mut modified = connection("c");
        modified.connection_type = ConnectionType::Mqtt;
        let command = Command {
            id: "c".into(),
            headers: Headers::empty(),
            kind: CommandKind::Modify(modified),
        };
        assert_matches!(
            validator.validate(&command, Some(&existing)),
            Err(ConnectivityError::ConfigurationInvalid { .. })
        );
    }

    #[test]
    fn allows_modify_with_same_type() {
        let validator = DefaultCommandValidator;
        let existing = connection("c");
        let mut modified = connection("c");
        modified.client_count = 3;
        let command = Command {
            id: "c".into(),
            headers: Headers::empty(),
            kind: CommandKind::Modify(modified),
        };
        assert_matches!(validator.validate(&command, Some(&existing)), Ok(()));
    }
}
