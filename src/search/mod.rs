pub mod filter;
pub mod parse;
pub mod weigh;

pub use self::{
    filter::{filter, weigh_all},
    parse::{MatchType, SearchQuery, Tokens, parse},
    weigh::weigh,
};
