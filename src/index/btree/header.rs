use crate::common::types::{Page, PageId};
use crate::index::btree::error::BTreeError;

/// The header page (page 0): a small record map from index name to that
/// index's root page id, rewritten on every root change.
#[derive(Debug, Clone, Default)]
pub struct HeaderPage {
    records: Vec<(String, PageId)>,
}

impl HeaderPage {
    /// Decode the record map. A freshly zeroed page decodes as an empty map.
    pub fn load(page: &Page) -> Result<Self, BTreeError> {
        let records = bincode::deserialize(&page.data[..])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        Ok(Self { records })
    }

    pub fn store(&self, page: &mut Page) -> Result<(), BTreeError> {
        let body = bincode::serialize(&self.records)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if body.len() > page.data.len() {
            return Err(BTreeError::NodeTooLarge);
        }
        page.data.fill(0);
        page.data[..body.len()].copy_from_slice(&body);
        Ok(())
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.records
            .iter()
            .find(|(record_name, _)| record_name == name)
            .map(|(_, root)| *root)
    }

    /// Insert or update the record for `name`
    pub fn set_root_id(&mut self, name: &str, root_page_id: PageId) {
        match self.records.iter_mut().find(|(n, _)| n == name) {
            Some(record) => record.1 = root_page_id,
            None => self.records.push((name.to_string(), root_page_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_zeroed_page_is_empty_map() {
        let page = Page::new(0);
        let header = HeaderPage::load(&page).unwrap();
        assert_eq!(header.get_root_id("orders_pk"), None);
    }

    #[test]
    fn test_set_get_round_trip() {
        let mut page = Page::new(0);
        let mut header = HeaderPage::load(&page).unwrap();

        header.set_root_id("orders_pk", 17);
        header.set_root_id("users_pk", INVALID_PAGE_ID);
        header.set_root_id("orders_pk", 21); // update in place
        header.store(&mut page).unwrap();

        let restored = HeaderPage::load(&page).unwrap();
        assert_eq!(restored.get_root_id("orders_pk"), Some(21));
        assert_eq!(restored.get_root_id("users_pk"), Some(INVALID_PAGE_ID));
        assert_eq!(restored.get_root_id("missing"), None);
    }
}
