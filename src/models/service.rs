use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::period::Period;

/// Upper bound, in rupees, for any catalog price or booking total. Leaves
/// room to express every amount in paisa without overflowing `i64`.
pub const MAX_AMOUNT: i64 = i64::MAX / 100;

fn price_in_range(price: i64) -> bool {
    (0..=MAX_AMOUNT).contains(&price)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCategory {
    Venue,
    Photography,
    Decoration,
}

impl ServiceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Venue => "venue",
            ServiceCategory::Photography => "photography",
            ServiceCategory::Decoration => "decoration",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "venue" => Some(ServiceCategory::Venue),
            "photography" => Some(ServiceCategory::Photography),
            "decoration" => Some(ServiceCategory::Decoration),
            _ => None,
        }
    }
}

/// A priced dish or extra, referenced by id from package item lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub price: i64,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackageItem {
    pub menu_item_id: String,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_selection: u32,
}

/// Named group of free-text choices inside a menu section ("Starters", pick up to N).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SectionGroup {
    pub name: String,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_selection: u32,
    #[serde(default)]
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuSection {
    pub title: String,
    #[serde(default)]
    pub groups: Vec<SectionGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CateringPackage {
    pub id: String,
    #[serde(default)]
    pub period: Option<Period>,
    pub name: String,
    /// Price per guest.
    pub base_price: i64,
    pub min_guests: u32,
    pub max_guests: u32,
    #[serde(default)]
    pub included_items: Vec<PackageItem>,
    #[serde(default)]
    pub optional_items: Vec<PackageItem>,
    #[serde(default)]
    pub menu_sections: Vec<MenuSection>,
}

impl CateringPackage {
    pub fn included_item(&self, menu_item_id: &str) -> Option<&PackageItem> {
        self.included_items
            .iter()
            .find(|i| i.menu_item_id == menu_item_id)
    }

    pub fn optional_item(&self, menu_item_id: &str) -> Option<&PackageItem> {
        self.optional_items
            .iter()
            .find(|i| i.menu_item_id == menu_item_id)
    }

    pub fn section_group(&self, key: &SectionItemKey) -> Option<&SectionGroup> {
        self.menu_sections
            .get(key.section)
            .and_then(|s| s.groups.get(key.group))
            .filter(|g| key.item < g.items.len())
    }
}

/// Position of a free-text section item, encoded as `section-{section}-{group}-{item}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionItemKey {
    pub section: usize,
    pub group: usize,
    pub item: usize,
}

impl SectionItemKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix("section-")?;
        let mut parts = rest.split('-').map(|p| p.parse::<usize>().ok());
        let key = SectionItemKey {
            section: parts.next()??,
            group: parts.next()??,
            item: parts.next()??,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(key)
    }

    pub fn group_id(&self) -> (usize, usize) {
        (self.section, self.group)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub vendor_id: String,
    pub name: String,
    pub category: ServiceCategory,
    /// Flat price for one period.
    pub price: i64,
    pub capacity: u32,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub catering_packages: Vec<CateringPackage>,
    #[serde(default)]
    pub catering_menu: Vec<MenuItem>,
    pub created_at: NaiveDateTime,
}

impl Service {
    pub fn package(&self, id: &str) -> Option<&CateringPackage> {
        self.catering_packages.iter().find(|p| p.id == id)
    }

    pub fn menu_item(&self, id: &str) -> Option<&MenuItem> {
        self.catering_menu.iter().find(|m| m.id == id)
    }

    /// Structural checks applied when a vendor registers the service.
    pub fn check_catalog(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name is required".to_string());
        }
        if !price_in_range(self.price) {
            return Err(format!("price must be between 0 and {MAX_AMOUNT}"));
        }
        if !self.catering_packages.is_empty() && self.category != ServiceCategory::Venue {
            return Err("catering packages are only offered by venues".to_string());
        }
        for item in &self.catering_menu {
            if !price_in_range(item.price) {
                return Err(format!("menu item {} has a price out of range", item.id));
            }
        }
        for pkg in &self.catering_packages {
            if !price_in_range(pkg.base_price) {
                return Err(format!("package {} has a base price out of range", pkg.id));
            }
            if pkg.min_guests > pkg.max_guests {
                return Err(format!(
                    "package {} has minGuests greater than maxGuests",
                    pkg.id
                ));
            }
            for item in pkg.included_items.iter().chain(&pkg.optional_items) {
                if self.menu_item(&item.menu_item_id).is_none() {
                    return Err(format!(
                        "package {} references unknown menu item {}",
                        pkg.id, item.menu_item_id
                    ));
                }
            }
        }
        let mut ids: Vec<&str> = self.catering_packages.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err("catering package ids must be unique".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> Service {
        Service {
            id: "svc-1".to_string(),
            vendor_id: "vendor-1".to_string(),
            name: "Lakeside Hall".to_string(),
            category: ServiceCategory::Venue,
            price: 1000,
            capacity: 200,
            duration: None,
            catering_packages: vec![CateringPackage {
                id: "pkg-1".to_string(),
                period: Some(Period::Evening),
                name: "Classic".to_string(),
                base_price: 500,
                min_guests: 10,
                max_guests: 50,
                included_items: vec![PackageItem {
                    menu_item_id: "rice".to_string(),
                    max_selection: 0,
                }],
                optional_items: vec![],
                menu_sections: vec![],
            }],
            catering_menu: vec![MenuItem {
                id: "rice".to_string(),
                name: "Rice".to_string(),
                price: 0,
                category: None,
            }],
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_section_key_parse() {
        let key = SectionItemKey::parse("section-0-2-5").unwrap();
        assert_eq!(key, SectionItemKey { section: 0, group: 2, item: 5 });
        assert!(SectionItemKey::parse("section-0-2").is_none());
        assert!(SectionItemKey::parse("section-0-2-5-1").is_none());
        assert!(SectionItemKey::parse("rice").is_none());
        assert!(SectionItemKey::parse("section-a-b-c").is_none());
    }

    #[test]
    fn test_catalog_ok() {
        assert!(venue().check_catalog().is_ok());
    }

    #[test]
    fn test_catalog_rejects_dangling_menu_reference() {
        let mut svc = venue();
        svc.catering_packages[0].optional_items.push(PackageItem {
            menu_item_id: "lobster".to_string(),
            max_selection: 1,
        });
        let err = svc.check_catalog().unwrap_err();
        assert!(err.contains("lobster"));
    }

    #[test]
    fn test_catalog_rejects_inverted_guest_bounds() {
        let mut svc = venue();
        svc.catering_packages[0].min_guests = 100;
        assert!(svc.check_catalog().is_err());
    }

    #[test]
    fn test_catalog_rejects_catering_on_photography() {
        let mut svc = venue();
        svc.category = ServiceCategory::Photography;
        assert!(svc.check_catalog().is_err());
    }

    #[test]
    fn test_catalog_rejects_prices_out_of_range() {
        let mut svc = venue();
        svc.price = MAX_AMOUNT;
        assert!(svc.check_catalog().is_ok());

        svc.price = 4_000_000_000_000_000_000;
        assert!(svc.check_catalog().is_err());

        svc.price = -1;
        assert!(svc.check_catalog().is_err());

        let mut svc = venue();
        svc.catering_packages[0].base_price = MAX_AMOUNT + 1;
        assert!(svc.check_catalog().unwrap_err().contains("pkg-1"));

        let mut svc = venue();
        svc.catering_menu[0].price = i64::MAX;
        assert!(svc.check_catalog().unwrap_err().contains("rice"));
    }

    #[test]
    fn test_package_json_defaults() {
        let json = r#"{"id":"p","name":"Basic","basePrice":300,"minGuests":1,"maxGuests":5}"#;
        let pkg: CateringPackage = serde_json::from_str(json).unwrap();
        assert!(pkg.included_items.is_empty());
        assert!(pkg.menu_sections.is_empty());
        assert_eq!(pkg.period, None);
    }
}
