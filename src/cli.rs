use clap::{Parser, Subcommand};

/// Incubator: project invitations and approvals
#[derive(Parser)]
#[command(name = "incubator", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to INCUBATOR_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Invite users into a project relation and email them a link
    Invite {
        #[arg(long)]
        project_id: String,
        /// members, encadrants or juryMembers
        #[arg(long)]
        relation: String,
        #[arg(long, value_delimiter = ',', required = true)]
        emails: Vec<String>,
    },

    /// Inspect and decide approval requests
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Inspect project relations
    Relation {
        #[command(subcommand)]
        command: RelationCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// List approval requests for a project
    List {
        #[arg(long)]
        project_id: String,
        /// pending, approved or rejected
        #[arg(long)]
        status: Option<String>,
    },
    /// Show what a pending token is for
    Details {
        #[arg(long)]
        token: String,
    },
    /// Redeem a token
    Approve {
        #[arg(long)]
        token: String,
        /// Expected relation; refused if the token belongs to another one
        #[arg(long)]
        relation: Option<String>,
    },
    /// Decline a token
    Reject {
        #[arg(long)]
        token: String,
    },
}

#[derive(Subcommand)]
pub enum RelationCommands {
    /// List the users in a project relation
    List {
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        relation: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_splits_comma_separated_emails() {
        let cli = Cli::try_parse_from([
            "incubator",
            "invite",
            "--project-id",
            "00000000-0000-0000-0000-000000000001",
            "--relation",
            "members",
            "--emails",
            "a@x.com,b@x.com",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Invite { emails, relation, .. }) => {
                assert_eq!(emails, vec!["a@x.com", "b@x.com"]);
                assert_eq!(relation, "members");
            }
            _ => panic!("expected invite"),
        }
    }

    #[test]
    fn test_help_needs_no_configuration() {
        let err = Cli::try_parse_from(["incubator", "--help"]).err().unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(err.to_string().contains("invite"));
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["incubator"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_approve_accepts_optional_relation() {
        let cli = Cli::try_parse_from([
            "incubator", "approval", "approve", "--token", "abc", "--relation", "juryMembers",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Approval {
                command: ApprovalCommands::Approve { relation: Some(_), .. }
            })
        ));
    }
}
