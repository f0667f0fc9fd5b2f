//! Shared test fixture: one seeded organization in an in-memory store.

use std::sync::Arc;

use chrono::Utc;

use keystone_core::{MembershipId, RoleId, UserId};

use crate::audit::{AuditRecord, AuditRecorder, MemoryAuditSink};
use crate::guard::AccessGuard;
use crate::membership::Membership;
use crate::organization::Organization;
use crate::principal::{Principal, User};
use crate::resolver::PermissionResolver;
use crate::service::{MembershipService, SeededRoles};
use crate::store::memory::InMemoryAccessStore;
use crate::store::{AccessStore, AccessTx};
use crate::tenant::{RequestContext, TenantContext};

pub(crate) struct Fixture {
    pub store: Arc<InMemoryAccessStore>,
    pub tenant: TenantContext,
    pub roles: SeededRoles,
    pub owner: UserId,
    pub owner_membership: MembershipId,
    pub audit: MemoryAuditSink,
    recorder: AuditRecorder,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(InMemoryAccessStore::new())).await
    }

    /// A second organization in the same store as `other`.
    pub async fn new_sharing(other: &Fixture) -> Self {
        Self::with_store(other.store.clone()).await
    }

    async fn with_store(store: Arc<InMemoryAccessStore>) -> Self {
        let org = Organization::new("Acme", "acme");
        let org = Organization {
            slug: format!("acme-{}", org.id),
            ..org
        };
        store.put_organization(org.clone()).await;
        let tenant = TenantContext::top_level(org.id);

        let audit = MemoryAuditSink::new();
        let (recorder, _worker) = AuditRecorder::spawn(Arc::new(audit.clone()), 64);
        let service = MembershipService::new(store.clone(), recorder.clone());
        let roles = service.seed_default_roles(&tenant).await.unwrap();

        let owner = User::new(format!("owner-{}@example.com", org.id), "Owner");
        store.put_user(owner.clone()).await;

        let mut fx = Self {
            store,
            tenant,
            roles,
            owner: owner.id,
            owner_membership: MembershipId::new(),
            audit,
            recorder,
        };
        fx.owner_membership = fx.add_member(owner.id, roles.owner).await;
        fx
    }

    pub fn service(&self) -> MembershipService<InMemoryAccessStore> {
        MembershipService::new(self.store.clone(), self.recorder.clone())
    }

    pub fn resolver(&self) -> PermissionResolver<InMemoryAccessStore> {
        PermissionResolver::new(self.store.clone())
    }

    pub fn guard(&self) -> AccessGuard<InMemoryAccessStore> {
        AccessGuard::new(self.store.clone())
    }

    pub async fn add_user(&self, email: &str) -> UserId {
        let user = User::new(email, email);
        let id = user.id;
        self.store.put_user(user).await;
        id
    }

    pub async fn add_member(&self, user: UserId, role: RoleId) -> MembershipId {
        self.insert_membership(Membership::new(self.tenant.organization_id(), user, Some(role)))
            .await
    }

    pub async fn add_membership_without_role(&self, user: UserId) -> MembershipId {
        self.insert_membership(Membership::new(self.tenant.organization_id(), user, None))
            .await
    }

    async fn insert_membership(&self, membership: Membership) -> MembershipId {
        let mut tx = self.store.begin(&self.tenant).await.unwrap();
        tx.insert_membership(&membership).await.unwrap();
        tx.commit().await.unwrap();
        membership.id
    }

    pub async fn principal(&self, user: UserId) -> Principal {
        let user = self.store.find_user(user).await.unwrap().unwrap();
        Principal::authenticate(&user, Utc::now()).unwrap()
    }

    /// Request acting in this fixture's organization.
    pub async fn request(&self, user: UserId) -> RequestContext {
        RequestContext::authenticated(self.principal(user).await, Some(self.tenant.organization_id()))
    }

    pub async fn request_without_tenant(&self, user: UserId) -> RequestContext {
        RequestContext::authenticated(self.principal(user).await, None)
    }

    /// Records the background worker has written so far.
    pub async fn audit_records(&self) -> Vec<AuditRecord> {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        self.audit.records().await
    }
}
