use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, DbErr, QuerySelect, Set};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The central table for user-program-role relationships.
///
/// The trainee rows of a program form its roster, which is what the sweeper
/// diffs attendance records against.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "program_enrollments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,

    #[sea_orm(primary_key, auto_increment = false)]
    pub program_id: i64,

    pub role: Role,
}

/// Enum representing user roles within a program.
#[derive(
    Debug, Clone, Copy, PartialEq, EnumIter, DeriveActiveEnum, Display, EnumString, Deserialize,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "program_role_type")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Role {
    #[sea_orm(string_value = "facilitator")]
    Facilitator,

    #[sea_orm(string_value = "manager")]
    Manager,

    #[sea_orm(string_value = "trainee")]
    Trainee,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,

    #[sea_orm(
        belongs_to = "super::program::Entity",
        from = "Column::ProgramId",
        to = "super::program::Column::Id"
    )]
    Program,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::program::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Program.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn enroll(
        db: &DatabaseConnection,
        user_id: i64,
        program_id: i64,
        role: Role,
    ) -> Result<Self, DbErr> {
        let row = ActiveModel {
            user_id: Set(user_id),
            program_id: Set(program_id),
            role: Set(role),
        };
        row.insert(db).await
    }

    /// True if the user holds `role` in the given program.
    pub async fn is_in_role(
        db: &DatabaseConnection,
        user_id: i64,
        program_id: i64,
        role: Role,
    ) -> Result<bool, DbErr> {
        let found = Entity::find()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::ProgramId.eq(program_id))
            .filter(Column::Role.eq(role))
            .one(db)
            .await?;
        Ok(found.is_some())
    }

    /// The program roster: ids of every enrolled trainee.
    pub async fn trainee_ids_for_program(
        db: &DatabaseConnection,
        program_id: i64,
    ) -> Result<Vec<i64>, DbErr> {
        let ids = Entity::find()
            .select_only()
            .column(Column::UserId)
            .filter(Column::ProgramId.eq(program_id))
            .filter(Column::Role.eq(Role::Trainee))
            .into_tuple::<i64>()
            .all(db)
            .await?;
        Ok(ids)
    }
}
