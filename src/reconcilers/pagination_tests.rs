// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `pagination.rs`

#[cfg(test)]
mod tests {
    use crate::constants::LIST_PAGE_SIZE;

    #[test]
    fn test_page_size_is_bounded() {
        #[allow(clippy::assertions_on_constants)]
        {
            assert!(LIST_PAGE_SIZE >= 50, "too many round trips on large clusters");
            assert!(LIST_PAGE_SIZE <= 500, "pages should stay small");
        }
    }

    #[test]
    fn test_thousand_policies_fit_in_ten_pages() {
        assert_eq!(1000_u32.div_ceil(LIST_PAGE_SIZE), 10);
    }
}
