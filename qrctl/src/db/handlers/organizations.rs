//! Database repository for organizations, their members and invitations.

use sqlx::{Connection, PgConnection};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::rbac::OrgRole;
use crate::db::{
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::organizations::{
        InvitationCreateDBRequest, InvitationDBResponse, MemberDBResponse, OrganizationCreateDBRequest, OrganizationDBResponse,
        OrganizationUpdateDBRequest, OrganizationWithRole,
    },
};
use crate::types::{InvitationId, OrganizationId, UserId, abbrev_uuid};

#[derive(Debug, Clone)]
pub struct OrganizationFilter {
    pub skip: i64,
    pub limit: i64,
}

pub struct Organizations<'c> {
    db: &'c mut PgConnection,
}

#[async_trait::async_trait]
impl<'c> Repository for Organizations<'c> {
    type CreateRequest = OrganizationCreateDBRequest;
    type UpdateRequest = OrganizationUpdateDBRequest;
    type Response = OrganizationDBResponse;
    type Id = OrganizationId;
    type Filter = OrganizationFilter;

    /// Creates the organization and makes the creator its owner
    #[instrument(skip(self, request), fields(slug = %request.slug), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let mut tx = self.db.begin().await?;

        let org = sqlx::query_as::<_, OrganizationDBResponse>(
            "INSERT INTO organizations (id, name, slug, owner_id) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&request.name)
        .bind(&request.slug)
        .bind(request.owner_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO organization_members (organization_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(org.id)
            .bind(request.owner_id)
            .bind(OrgRole::Owner.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(org)
    }

    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(org)
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let orgs = sqlx::query_as::<_, OrganizationDBResponse>("SELECT * FROM organizations ORDER BY created_at DESC LIMIT $1 OFFSET $2")
            .bind(filter.limit)
            .bind(filter.skip)
            .fetch_all(&mut *self.db)
            .await?;
        Ok(orgs)
    }

    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1").bind(id).execute(&mut *self.db).await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(organization_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let org = sqlx::query_as::<_, OrganizationDBResponse>(
            "UPDATE organizations SET name = COALESCE($2, name) WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&request.name)
        .fetch_optional(&mut *self.db)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(org)
    }
}

impl<'c> Organizations<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self), err)]
    pub async fn count(&mut self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM organizations")
            .fetch_one(&mut *self.db)
            .await?;
        Ok(count)
    }

    #[instrument(skip(self), fields(user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn list_for_user(&mut self, user_id: UserId) -> Result<Vec<OrganizationWithRole>> {
        let orgs = sqlx::query_as::<_, OrganizationWithRole>(
            r#"
            SELECT o.id, o.name, o.slug, o.owner_id, o.created_at, m.role
            FROM organizations o
            JOIN organization_members m ON m.organization_id = o.id
            WHERE m.user_id = $1
            ORDER BY o.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(orgs)
    }

    /// The user's role in the organization, `None` when not a member
    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn get_member_role(&mut self, org_id: OrganizationId, user_id: UserId) -> Result<Option<OrgRole>> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM organization_members WHERE organization_id = $1 AND user_id = $2")
                .bind(org_id)
                .bind(user_id)
                .fetch_optional(&mut *self.db)
                .await?;
        Ok(role.and_then(|r| r.parse().ok()))
    }

    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id)), err)]
    pub async fn list_members(&mut self, org_id: OrganizationId) -> Result<Vec<MemberDBResponse>> {
        let members = sqlx::query_as::<_, MemberDBResponse>(
            r#"
            SELECT m.organization_id, m.user_id, m.role, m.created_at, u.email, u.display_name
            FROM organization_members m
            JOIN users u ON u.id = m.user_id
            WHERE m.organization_id = $1
            ORDER BY m.created_at
            "#,
        )
        .bind(org_id)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(members)
    }

    /// Adds a member, or changes the role of an existing non-owner member
    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn upsert_member(&mut self, org_id: OrganizationId, user_id: UserId, role: OrgRole) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO organization_members (organization_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (organization_id, user_id)
            DO UPDATE SET role = EXCLUDED.role
            WHERE organization_members.role <> 'owner'
            "#,
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn update_member_role(&mut self, org_id: OrganizationId, user_id: UserId, role: OrgRole) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE organization_members SET role = $3 WHERE organization_id = $1 AND user_id = $2 AND role <> 'owner'",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id), user_id = %abbrev_uuid(&user_id)), err)]
    pub async fn remove_member(&mut self, org_id: OrganizationId, user_id: UserId) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM organization_members WHERE organization_id = $1 AND user_id = $2 AND role <> 'owner'")
                .bind(org_id)
                .bind(user_id)
                .execute(&mut *self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Swaps owner and target roles and moves `owner_id`, all in one transaction
    #[instrument(skip(self), fields(organization_id = %abbrev_uuid(&org_id)), err)]
    pub async fn transfer_ownership(&mut self, org_id: OrganizationId, from: UserId, to: UserId) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE organization_members SET role = 'admin' WHERE organization_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(from)
            .execute(&mut *tx)
            .await?;

        let promoted = sqlx::query("UPDATE organization_members SET role = 'owner' WHERE organization_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(to)
            .execute(&mut *tx)
            .await?;
        if promoted.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        sqlx::query("UPDATE organizations SET owner_id = $2 WHERE id = $1")
            .bind(org_id)
            .bind(to)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(organization_id = %abbrev_uuid(&request.organization_id)), err)]
    pub async fn create_invitation(&mut self, request: &InvitationCreateDBRequest) -> Result<InvitationDBResponse> {
        let invitation = sqlx::query_as::<_, InvitationDBResponse>(
            r#"
            INSERT INTO organization_invitations (id, organization_id, email, role, token, expires_at, invited_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.organization_id)
        .bind(request.email.trim().to_lowercase())
        .bind(request.role.as_str())
        .bind(&request.token)
        .bind(request.expires_at)
        .bind(request.invited_by)
        .fetch_one(&mut *self.db)
        .await?;
        Ok(invitation)
    }

    #[instrument(skip(self, token), err)]
    pub async fn get_invitation_by_token(&mut self, token: &str) -> Result<Option<InvitationDBResponse>> {
        let invitation = sqlx::query_as::<_, InvitationDBResponse>("SELECT * FROM organization_invitations WHERE token = $1")
            .bind(token)
            .fetch_optional(&mut *self.db)
            .await?;
        Ok(invitation)
    }

    #[instrument(skip(self), fields(invitation_id = %abbrev_uuid(&id)), err)]
    pub async fn mark_invitation_accepted(&mut self, id: InvitationId) -> Result<bool> {
        let result =
            sqlx::query("UPDATE organization_invitations SET accepted_at = NOW() WHERE id = $1 AND accepted_at IS NULL")
                .bind(id)
                .execute(&mut *self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlements::PlanName;
    use crate::test_utils::create_test_user;
    use chrono::{Duration, Utc};
    use sqlx::PgPool;

    async fn create_org(conn: &mut PgConnection, owner_id: UserId, slug: &str) -> OrganizationDBResponse {
        Organizations::new(conn)
            .create(&OrganizationCreateDBRequest {
                name: slug.to_uppercase(),
                slug: slug.to_string(),
                owner_id,
            })
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_creator_becomes_owner(pool: PgPool) {
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let org = create_org(&mut conn, owner.id, "acme").await;

        let mut orgs = Organizations::new(&mut conn);
        assert_eq!(orgs.get_member_role(org.id, owner.id).await.unwrap(), Some(OrgRole::Owner));
        let listed = orgs.list_for_user(owner.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].role, "owner");

        let duplicate = Organizations::new(&mut conn)
            .create(&OrganizationCreateDBRequest {
                name: "Other".to_string(),
                slug: "acme".to_string(),
                owner_id: owner.id,
            })
            .await;
        assert!(matches!(duplicate, Err(DbError::UniqueViolation { .. })));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_owner_role_cannot_be_changed_or_removed(pool: PgPool) {
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let member = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let org = create_org(&mut conn, owner.id, "acme").await;
        let mut orgs = Organizations::new(&mut conn);

        orgs.upsert_member(org.id, member.id, OrgRole::Member).await.unwrap();
        orgs.upsert_member(org.id, member.id, OrgRole::Admin).await.unwrap();
        assert_eq!(orgs.get_member_role(org.id, member.id).await.unwrap(), Some(OrgRole::Admin));

        orgs.upsert_member(org.id, owner.id, OrgRole::Member).await.unwrap();
        assert!(!orgs.update_member_role(org.id, owner.id, OrgRole::Member).await.unwrap());
        assert!(!orgs.remove_member(org.id, owner.id).await.unwrap());
        assert_eq!(orgs.get_member_role(org.id, owner.id).await.unwrap(), Some(OrgRole::Owner));

        assert!(orgs.remove_member(org.id, member.id).await.unwrap());
        assert_eq!(orgs.list_members(org.id).await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_transfer_ownership_swaps_roles(pool: PgPool) {
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let admin = create_test_user(&pool, PlanName::Free).await;
        let outsider = create_test_user(&pool, PlanName::Free).await;
        let mut conn = pool.acquire().await.unwrap();
        let org = create_org(&mut conn, owner.id, "acme").await;
        let mut orgs = Organizations::new(&mut conn);
        orgs.upsert_member(org.id, admin.id, OrgRole::Admin).await.unwrap();

        // Target must already be a member; nothing changes otherwise
        assert!(matches!(
            orgs.transfer_ownership(org.id, owner.id, outsider.id).await,
            Err(DbError::NotFound)
        ));
        assert_eq!(orgs.get_member_role(org.id, owner.id).await.unwrap(), Some(OrgRole::Owner));

        orgs.transfer_ownership(org.id, owner.id, admin.id).await.unwrap();
        assert_eq!(orgs.get_member_role(org.id, owner.id).await.unwrap(), Some(OrgRole::Admin));
        assert_eq!(orgs.get_member_role(org.id, admin.id).await.unwrap(), Some(OrgRole::Owner));
        assert_eq!(orgs.get_by_id(org.id).await.unwrap().unwrap().owner_id, admin.id);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_invitation_accepted_once(pool: PgPool) {
        let owner = create_test_user(&pool, PlanName::Pro).await;
        let mut conn = pool.acquire().await.unwrap();
        let org = create_org(&mut conn, owner.id, "acme").await;
        let mut orgs = Organizations::new(&mut conn);

        let invitation = orgs
            .create_invitation(&InvitationCreateDBRequest {
                organization_id: org.id,
                email: "  New.Member@Example.com ".to_string(),
                role: OrgRole::Member,
                token: "invite-token".to_string(),
                expires_at: Utc::now() + Duration::days(7),
                invited_by: owner.id,
            })
            .await
            .unwrap();
        assert_eq!(invitation.email, "new.member@example.com");

        let found = orgs.get_invitation_by_token("invite-token").await.unwrap().unwrap();
        assert_eq!(found.id, invitation.id);
        assert!(orgs.mark_invitation_accepted(invitation.id).await.unwrap());
        assert!(!orgs.mark_invitation_accepted(invitation.id).await.unwrap());
    }
}
