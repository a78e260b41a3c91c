use crate::asset::{FetchedOptions, MediaCharacteristic, MediaSelection, TrackGroup, TrackOption};

/// Track groups of an asset paired with what is already stored locally.
///
/// A catalog is a snapshot: rebuild it from the provider after every
/// completed fetch instead of mutating it.
#[derive(Debug, Clone)]
pub struct TrackCatalog {
    groups: Vec<TrackGroup>,
    fetched: FetchedOptions,
}

impl TrackCatalog {
    pub fn new(groups: Vec<TrackGroup>, fetched: FetchedOptions) -> Self {
        Self { groups, fetched }
    }

    pub fn groups(&self) -> &[TrackGroup] {
        &self.groups
    }

    pub fn fetched(&self) -> &FetchedOptions {
        &self.fetched
    }

    pub fn is_fetched(&self, characteristic: MediaCharacteristic, option_id: &str) -> bool {
        self.fetched.contains(characteristic, option_id)
    }

    /// Groups in resolution priority, keeping their declared order inside
    /// one characteristic.
    fn prioritized_groups(&self) -> impl Iterator<Item = &TrackGroup> {
        MediaCharacteristic::PRIORITY.into_iter().flat_map(move |c| {
            self.groups
                .iter()
                .filter(move |group| group.characteristic == c)
        })
    }

    /// First option not stored yet, scanning audible groups before legible
    /// ones and options in group order.
    pub fn next_missing_option(&self) -> Option<(&TrackGroup, &TrackOption)> {
        self.missing_options().into_iter().next()
    }

    pub fn missing_options(&self) -> Vec<(&TrackGroup, &TrackOption)> {
        self.prioritized_groups()
            .flat_map(|group| {
                group
                    .options
                    .iter()
                    .filter(move |option| !self.is_fetched(group.characteristic, &option.id))
                    .map(move |option| (group, option))
            })
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.next_missing_option().is_none()
    }

    /// The selection a primary fetch makes: each group's default option.
    pub fn default_selection(&self) -> MediaSelection {
        let mut selection = MediaSelection::new();
        for group in self.prioritized_groups() {
            if selection.get(group.characteristic).is_some() {
                continue;
            }
            if let Some(option) = group.default_option() {
                selection.select(group.characteristic, option.id.clone());
            }
        }
        selection
    }
}
