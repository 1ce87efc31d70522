pub(crate) use receipt::{check_receipt, ReceiptOutcome};
pub(crate) use submission::{dispatch, sign_request, SubmissionOutcome};

mod nonce;
mod receipt;
mod submission;
pub(crate) mod utils;
