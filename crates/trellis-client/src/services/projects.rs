use trellis_protocol::models::{Project, Request};
use trellis_protocol::Operation;

use super::Service;
use crate::dispatcher::Dispatcher;

/// The project the credential belongs to, or the one named by `uuid`.
pub const GET_PROJECT: Operation<Project> = Operation::new("platform.shared.GetProject", &[]);

/// Approve the item contract to spend the maximum ENJ amount.
///
/// Accepts an optional `ethAddress` to sign with; returns the created
/// transaction request.
pub const APPROVE_MAX_ENJ: Operation<Request> =
    Operation::new("platform.project.ApproveMaxEnj", &[]);

#[derive(Clone)]
pub struct ProjectService {
    dispatcher: Dispatcher,
}

impl Service for ProjectService {
    const NAME: &'static str = "projects";

    fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl ProjectService {
    operation_methods!(get_project, get_project_with, Project);

    operation_methods!(
        /// Submit an ENJ approval transaction.
        approve_max_enj, approve_max_enj_with, Request
    );
}
