use murmur_storage::MessageId;

/// Identifier for one issued gateway call.
///
/// Every create, save and delete gets a fresh ticket so late completions can
/// be matched (or rejected) deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutationTicket(pub u64);

impl MutationTicket {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Open edit affordance: which message is being edited and the working text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
    pub target_id: MessageId,
    pub draft_text: String,
}

impl EditSession {
    pub fn new(target_id: MessageId, draft_text: impl Into<String>) -> Self {
        Self {
            target_id,
            draft_text: draft_text.into(),
        }
    }
}

/// Send/edit state of one session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Sending(MutationTicket),
    Editing(EditSession),
    EditingSaving {
        edit: EditSession,
        ticket: MutationTicket,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    Submit(MutationTicket),
    SendSettled {
        ticket: MutationTicket,
        succeeded: bool,
    },
    OpenEdit(EditSession),
    UpdateDraft(String),
    Save(MutationTicket),
    SaveSettled {
        ticket: MutationTicket,
        succeeded: bool,
    },
    CancelEdit,
}

/// Rejection reason for illegal transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionRejection {
    OperationInFlight { active: MutationTicket },
    EditInProgress { target_id: MessageId },
    NotEditing,
    NoActiveMutation,
    TicketMismatch {
        active: MutationTicket,
        attempted: MutationTicket,
    },
}

pub type TransitionResult = Result<SessionState, TransitionRejection>;

impl SessionState {
    /// Stable label used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Sending(_) => "sending",
            Self::Editing(_) => "editing-idle",
            Self::EditingSaving { .. } => "editing-saving",
        }
    }

    /// Ticket of the create or save currently awaiting the gateway.
    pub fn in_flight(&self) -> Option<MutationTicket> {
        match self {
            Self::Sending(ticket) | Self::EditingSaving { ticket, .. } => Some(*ticket),
            Self::Idle | Self::Editing(_) => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight().is_some()
    }

    /// Open edit, including one whose save is in flight.
    pub fn edit(&self) -> Option<&EditSession> {
        match self {
            Self::Editing(edit) | Self::EditingSaving { edit, .. } => Some(edit),
            Self::Idle | Self::Sending(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// At most one create or save is in flight at a time: starting another one
    /// from `Sending`/`EditingSaving` is rejected rather than queued.
    pub fn apply(&self, transition: SessionTransition) -> TransitionResult {
        match transition {
            SessionTransition::Submit(ticket) => self.apply_submit(ticket),
            SessionTransition::SendSettled { ticket, .. } => self.apply_send_settled(ticket),
            SessionTransition::OpenEdit(edit) => self.apply_open_edit(edit),
            SessionTransition::UpdateDraft(text) => self.apply_update_draft(text),
            SessionTransition::Save(ticket) => self.apply_save(ticket),
            SessionTransition::SaveSettled { ticket, succeeded } => {
                self.apply_save_settled(ticket, succeeded)
            }
            SessionTransition::CancelEdit => self.apply_cancel_edit(),
        }
    }

    fn apply_submit(&self, ticket: MutationTicket) -> TransitionResult {
        match self {
            Self::Idle => Ok(Self::Sending(ticket)),
            Self::Sending(active) | Self::EditingSaving { ticket: active, .. } => {
                Err(TransitionRejection::OperationInFlight { active: *active })
            }
            Self::Editing(edit) => Err(TransitionRejection::EditInProgress {
                target_id: edit.target_id.clone(),
            }),
        }
    }

    fn apply_send_settled(&self, ticket: MutationTicket) -> TransitionResult {
        match self {
            Self::Sending(active) if *active == ticket => Ok(Self::Idle),
            Self::Sending(active) | Self::EditingSaving { ticket: active, .. } => {
                Err(TransitionRejection::TicketMismatch {
                    active: *active,
                    attempted: ticket,
                })
            }
            Self::Idle | Self::Editing(_) => Err(TransitionRejection::NoActiveMutation),
        }
    }

    fn apply_open_edit(&self, edit: EditSession) -> TransitionResult {
        match self {
            Self::Idle => Ok(Self::Editing(edit)),
            Self::Sending(active) | Self::EditingSaving { ticket: active, .. } => {
                Err(TransitionRejection::OperationInFlight { active: *active })
            }
            Self::Editing(current) => Err(TransitionRejection::EditInProgress {
                target_id: current.target_id.clone(),
            }),
        }
    }

    fn apply_update_draft(&self, text: String) -> TransitionResult {
        match self {
            Self::Editing(edit) => Ok(Self::Editing(EditSession::new(edit.target_id.clone(), text))),
            // The draft being saved stays frozen until the save settles.
            Self::EditingSaving { ticket, .. } => {
                Err(TransitionRejection::OperationInFlight { active: *ticket })
            }
            Self::Idle | Self::Sending(_) => Err(TransitionRejection::NotEditing),
        }
    }

    fn apply_save(&self, ticket: MutationTicket) -> TransitionResult {
        match self {
            Self::Editing(edit) => Ok(Self::EditingSaving {
                edit: edit.clone(),
                ticket,
            }),
            Self::EditingSaving { ticket: active, .. } => {
                Err(TransitionRejection::OperationInFlight { active: *active })
            }
            Self::Idle | Self::Sending(_) => Err(TransitionRejection::NotEditing),
        }
    }

    fn apply_save_settled(&self, ticket: MutationTicket, succeeded: bool) -> TransitionResult {
        match self {
            Self::EditingSaving { edit, ticket: active } if *active == ticket => {
                if succeeded {
                    Ok(Self::Idle)
                } else {
                    Ok(Self::Editing(edit.clone()))
                }
            }
            Self::EditingSaving { ticket: active, .. } | Self::Sending(active) => {
                Err(TransitionRejection::TicketMismatch {
                    active: *active,
                    attempted: ticket,
                })
            }
            Self::Idle | Self::Editing(_) => Err(TransitionRejection::NoActiveMutation),
        }
    }

    fn apply_cancel_edit(&self) -> TransitionResult {
        match self {
            Self::Editing(_) => Ok(Self::Idle),
            Self::EditingSaving { ticket, .. } => {
                Err(TransitionRejection::OperationInFlight { active: *ticket })
            }
            Self::Idle | Self::Sending(_) => Err(TransitionRejection::NotEditing),
        }
    }
}
