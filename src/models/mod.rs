mod link;

pub use link::{
    CreateLinkRequest, Link, LinkListResponse, LinkResponse, LinkSummary, UpdateLinkRequest,
};
