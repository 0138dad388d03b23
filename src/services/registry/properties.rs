use std::collections::BTreeMap;
use std::fmt;

use super::types::{OBJECT_CLASS, SERVICE_ID, SERVICE_RANKING, ServiceId};
use crate::services::error::{RegistryError, Result};

/// 服务属性值
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s}"),
            PropertyValue::Long(n) => write!(f, "{n}"),
            PropertyValue::Double(d) => write!(f, "{d}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Long(value.into())
    }
}

impl From<u64> for PropertyValue {
    fn from(value: u64) -> Self {
        PropertyValue::Long(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(values: Vec<String>) -> Self {
        PropertyValue::List(values.into_iter().map(PropertyValue::String).collect())
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(values: Vec<PropertyValue>) -> Self {
        PropertyValue::List(values)
    }
}

/// 按键有序、键名大小写不敏感的属性集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    // 小写键 -> (原始键, 值)
    entries: BTreeMap<String, (String, PropertyValue)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从键值对构建，大小写不同的重复键返回 `DuplicateProperty`
    pub fn try_from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        let mut props = Self::new();
        for (key, value) in pairs {
            let key = key.into();
            if props.contains_key(&key) {
                return Err(RegistryError::DuplicateProperty { key });
            }
            props.insert(key, value);
        }
        Ok(props)
    }

    /// 设置单个键，大小写不同的同名键会被替换；批量构建请用 `try_from_pairs`
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// 插入或替换（大小写不敏感），返回旧值
    ///
    /// 这是按键更新的语义，不做重复键检查。
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Option<PropertyValue> {
        let key = key.into();
        self.entries
            .insert(key.to_lowercase(), (key, value.into()))
            .map(|(_, old)| old)
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(&key.to_lowercase()).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(&key.to_lowercase()).map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.entries.values().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `service.ranking`，非整数视为 0
    pub fn ranking(&self) -> i64 {
        self.get(SERVICE_RANKING)
            .and_then(PropertyValue::as_long)
            .unwrap_or(0)
    }

    pub fn service_id(&self) -> Option<ServiceId> {
        self.get(SERVICE_ID)
            .and_then(PropertyValue::as_long)
            .and_then(|id| ServiceId::try_from(id).ok())
    }

    pub fn object_class(&self) -> Vec<String> {
        match self.get(OBJECT_CLASS) {
            Some(PropertyValue::List(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            Some(PropertyValue::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    // 覆盖注册表保留的属性
    pub(crate) fn with_reserved(mut self, service_id: ServiceId, types: &[String]) -> Self {
        for reserved in [OBJECT_CLASS, SERVICE_ID] {
            if self.remove(reserved).is_some() {
                tracing::debug!(
                    key = reserved,
                    service_id = service_id,
                    "Ignoring caller-supplied reserved property"
                );
            }
        }
        self.insert(OBJECT_CLASS, types.to_vec());
        self.insert(SERVICE_ID, service_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_case_insensitive_and_keep_original_spelling() {
        let mut props = Properties::new();
        props.insert("Vendor", "acme");
        assert_eq!(props.get("vendor"), Some(&PropertyValue::from("acme")));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["Vendor"]);

        let old = props.insert("VENDOR", "other");
        assert_eq!(old, Some(PropertyValue::from("acme")));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_duplicate_keys_differing_in_case_are_rejected() {
        let result = Properties::try_from_pairs([("a", 1i64), ("A", 2i64)]);
        assert!(matches!(result, Err(RegistryError::DuplicateProperty { key }) if key == "A"));

        let result =
            Properties::try_from_pairs([("vendor", "acme"), ("region", "eu"), ("Vendor", "x")]);
        assert!(matches!(result, Err(RegistryError::DuplicateProperty { key }) if key == "Vendor"));

        let props = Properties::try_from_pairs([("a", 1i64), ("b", 2i64)])
            .expect("Failed to build properties");
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn test_ranking_defaults_to_zero() {
        assert_eq!(Properties::new().ranking(), 0);
        assert_eq!(Properties::new().with(SERVICE_RANKING, "high").ranking(), 0);
        assert_eq!(Properties::new().with(SERVICE_RANKING, -3).ranking(), -3);
    }

    #[test]
    fn test_reserved_properties_are_overwritten() {
        let props = Properties::new()
            .with("OBJECTCLASS", "Fake")
            .with(SERVICE_ID, 999i64)
            .with("custom", true)
            .with_reserved(4, &["Foo".to_string()]);

        assert_eq!(props.service_id(), Some(4));
        assert_eq!(props.object_class(), vec!["Foo".to_string()]);
        assert_eq!(props.get("custom"), Some(&PropertyValue::Bool(true)));
        assert_eq!(props.len(), 3);
    }
}
