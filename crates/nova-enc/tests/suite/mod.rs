mod support;

mod document_states;
mod ledger_generations;
mod pending_updates;
mod session_lifecycle;
