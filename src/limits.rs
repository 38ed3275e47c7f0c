/// Max length of a short text field (names, numbers, codes).
pub const MAX_NAME_LEN: usize = 256;

/// Max length of a free-text field (descriptions, notes, addresses).
pub const MAX_TEXT_LEN: usize = 4096;

/// Max records held per entity kind.
pub const MAX_RECORDS_PER_KIND: usize = 1_000_000;

/// Max rows returned by a list endpoint.
pub const MAX_PAGE_SIZE: usize = 1000;

/// Max number of equality terms in a list filter.
pub const MAX_FILTER_TERMS: usize = 16;
