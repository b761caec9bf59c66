use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use admod_core::{Ad, NewAd, PrincipalId, Seller, SubjectId};

use super::{CloseOutcome, DirectoryError, SubjectDirectory};

#[derive(Debug, Default)]
struct Inner {
    sellers: HashMap<PrincipalId, Seller>,
    ads: HashMap<SubjectId, (Ad, bool)>,
    next_seller: i64,
    next_ad: i64,
}

/// Process-local directory for tests and the default dev setup.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: RwLock<Inner>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a seller while leaving its ads in place.
    ///
    /// Models a principal deleted out from under a pending task.
    pub fn remove_seller(&self, id: PrincipalId) -> bool {
        match self.inner.write() {
            Ok(mut inner) => inner.sellers.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, DirectoryError> {
        self.inner
            .write()
            .map_err(|_| DirectoryError::Connection("directory lock poisoned".into()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, DirectoryError> {
        self.inner
            .read()
            .map_err(|_| DirectoryError::Connection("directory lock poisoned".into()))
    }
}

#[async_trait]
impl SubjectDirectory for InMemoryDirectory {
    async fn create_seller(&self, is_verified_seller: bool) -> Result<Seller, DirectoryError> {
        let mut inner = self.write()?;
        inner.next_seller += 1;
        let seller = Seller {
            id: PrincipalId::new(inner.next_seller),
            is_verified_seller,
        };
        inner.sellers.insert(seller.id, seller);
        Ok(seller)
    }

    async fn create_ad(&self, ad: NewAd) -> Result<Ad, DirectoryError> {
        let mut inner = self.write()?;
        if !inner.sellers.contains_key(&ad.seller_id) {
            return Err(DirectoryError::Invalid(format!(
                "seller {} does not exist",
                ad.seller_id
            )));
        }
        inner.next_ad += 1;
        let ad = ad.into_ad(SubjectId::new(inner.next_ad));
        inner.ads.insert(ad.id, (ad.clone(), false));
        Ok(ad)
    }

    async fn get_ad(&self, id: SubjectId) -> Result<Option<Ad>, DirectoryError> {
        let inner = self.read()?;
        Ok(inner
            .ads
            .get(&id)
            .filter(|(_, closed)| !closed)
            .map(|(ad, _)| ad.clone()))
    }

    async fn get_seller(&self, id: PrincipalId) -> Result<Option<Seller>, DirectoryError> {
        Ok(self.read()?.sellers.get(&id).copied())
    }

    async fn close_ad(&self, id: SubjectId) -> Result<CloseOutcome, DirectoryError> {
        let mut inner = self.write()?;
        Ok(match inner.ads.get_mut(&id) {
            None => CloseOutcome::Missing,
            Some((_, true)) => CloseOutcome::AlreadyClosed,
            Some((_, closed)) => {
                *closed = true;
                CloseOutcome::Closed
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_ad(seller_id: PrincipalId) -> NewAd {
        NewAd {
            seller_id,
            title: "bike".into(),
            description: "red bike".into(),
            category: 3,
            images_qty: 2,
        }
    }

    #[tokio::test]
    async fn closed_ads_are_hidden() {
        let dir = InMemoryDirectory::new();
        let seller = dir.create_seller(true).await.unwrap();
        let ad = dir.create_ad(new_ad(seller.id)).await.unwrap();

        assert_eq!(dir.get_ad(ad.id).await.unwrap(), Some(ad.clone()));
        assert_eq!(dir.close_ad(ad.id).await.unwrap(), CloseOutcome::Closed);
        assert_eq!(dir.get_ad(ad.id).await.unwrap(), None);
        assert_eq!(dir.close_ad(ad.id).await.unwrap(), CloseOutcome::AlreadyClosed);
        assert_eq!(
            dir.close_ad(SubjectId::new(9999)).await.unwrap(),
            CloseOutcome::Missing
        );
    }

    #[tokio::test]
    async fn ads_require_an_existing_seller() {
        let dir = InMemoryDirectory::new();
        let err = dir.create_ad(new_ad(PrincipalId::new(77))).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Invalid(_)));
    }

    #[tokio::test]
    async fn removed_seller_leaves_ad_in_place() {
        let dir = InMemoryDirectory::new();
        let seller = dir.create_seller(false).await.unwrap();
        let ad = dir.create_ad(new_ad(seller.id)).await.unwrap();

        assert!(dir.remove_seller(seller.id));
        assert!(dir.get_seller(seller.id).await.unwrap().is_none());
        assert!(dir.get_ad(ad.id).await.unwrap().is_some());
    }
}
